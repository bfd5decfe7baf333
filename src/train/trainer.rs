//! The per-iteration training loop.
//!
//! One iteration records everything into a single command encoder: clears,
//! depth sort, forward/loss/gradient passes, the loss staging copy, and the
//! Adam updates. The host never waits on results; loss values drain through
//! the readback pool a few submissions later.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::{Buffer, BufferUsages, CommandEncoderDescriptor};

use crate::core::math;
use crate::gpu::{
    self, AdamConfig, DepthSorter, GpuAdam, GpuContext, GpuPointCloud, LossReadback,
    PointRenderer, RenderSettings, RenderTarget, SortBuffers,
};
use crate::render::convert;
use crate::scene::SplatScene;

/// Training hyperparameters and render settings.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub step_size: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Training resolution as a fraction of each reference image's size.
    pub resolution_scale: f32,
    pub point_radius: f32,
    pub draw_fraction: f32,
    pub background: [f32; 4],
    /// Fixed seed for the camera picker; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            step_size: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            resolution_scale: 0.25,
            point_radius: 10.0,
            draw_fraction: 1.0,
            background: [0.0, 0.0, 0.0, 1.0],
            rng_seed: None,
        }
    }
}

fn scaled_extent(extent: u32, scale: f32) -> u32 {
    ((extent as f32) * scale).round().max(1.0) as u32
}

struct CachedReference {
    buffer: Buffer,
    width: u32,
    height: u32,
}

/// Owns the training pipelines and per-iteration state for one scene.
/// Build a fresh trainer to train against a different scene.
pub struct Trainer {
    sorter: DepthSorter,
    renderer: PointRenderer,
    adam: GpuAdam,
    sort_bufs: SortBuffers,
    readback: LossReadback,
    loss_buffer: Buffer,
    target: Option<RenderTarget>,
    references: Vec<Option<CachedReference>>,
    settings: RenderSettings,
    resolution_scale: f32,
    rng: StdRng,
    smoothed_loss: Option<f32>,
}

impl Trainer {
    pub fn new(ctx: &GpuContext, config: TrainConfig) -> Self {
        let adam = GpuAdam::new(
            &ctx.device,
            AdamConfig {
                step_size: config.step_size,
                beta1: config.beta1,
                beta2: config.beta2,
                epsilon: config.epsilon,
            },
        );
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            sorter: DepthSorter::new(&ctx.device),
            renderer: PointRenderer::new(&ctx.device),
            adam,
            sort_bufs: SortBuffers::new(&ctx.device, 1),
            readback: LossReadback::new(),
            loss_buffer: gpu::create_buffer(
                &ctx.device,
                "loss cell",
                4,
                BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            ),
            target: None,
            references: Vec::new(),
            settings: RenderSettings {
                point_radius: config.point_radius,
                draw_fraction: config.draw_fraction,
                background: config.background,
            },
            resolution_scale: config.resolution_scale,
            rng,
            smoothed_loss: None,
        }
    }

    /// Completed optimization steps.
    pub fn step_count(&self) -> u32 {
        self.adam.t()
    }

    /// Exponentially smoothed loss for display; `None` until the first
    /// readback lands after a (re)start.
    pub fn smoothed_loss(&self) -> Option<f32> {
        self.smoothed_loss
    }

    pub fn settings(&self) -> RenderSettings {
        self.settings
    }

    pub fn resolution_scale(&self) -> f32 {
        self.resolution_scale
    }

    /// Takes effect next iteration; in-flight work is unaffected.
    pub fn set_draw_fraction(&mut self, fraction: f32) {
        self.settings.draw_fraction = fraction;
    }

    /// Takes effect next iteration; in-flight work is unaffected.
    pub fn set_point_radius(&mut self, radius: f32) {
        self.settings.point_radius = radius;
    }

    /// Change the training resolution. Blocks until the device is idle so
    /// the render target and cached references can be dropped safely.
    pub fn set_resolution_scale(&mut self, ctx: &GpuContext, scale: f32) {
        if scale == self.resolution_scale {
            return;
        }
        ctx.wait_idle();
        self.resolution_scale = scale;
        self.target = None;
        for slot in &mut self.references {
            *slot = None;
        }
    }

    /// Restart training: restore the cloud's initial parameters and reset
    /// the optimizer. Pending loss readbacks are left to drain normally.
    pub fn reset(&mut self, ctx: &GpuContext, cloud: &GpuPointCloud) {
        cloud.restore_initial(&ctx.queue);
        self.adam.reset();
        self.smoothed_loss = None;
        log::info!("training reset");
    }

    /// Run one training iteration: drain at most one finished loss
    /// readback, pick a random training view, and submit the iteration's
    /// sort, render, backward, and optimizer work in one command stream.
    pub fn step_iteration(
        &mut self,
        ctx: &GpuContext,
        cloud: &mut GpuPointCloud,
        scene: &SplatScene,
    ) {
        if self.adam.t() == 0 {
            self.smoothed_loss = None;
        }

        ctx.poll();
        if let Some(sample) = self.readback.try_consume(ctx.completed()) {
            self.smoothed_loss = Some(match self.smoothed_loss {
                None => sample,
                Some(current) => math::lerp(sample, current, 0.9),
            });
        }

        if scene.num_train_cameras == 0 {
            return;
        }
        if self.references.len() != scene.num_train_cameras {
            self.references = (0..scene.num_train_cameras).map(|_| None).collect();
        }

        let index = self.rng.gen_range(0..scene.num_train_cameras);
        let (camera, image) = scene.train_view(index);
        let width = scaled_extent(image.width(), self.resolution_scale);
        let height = scaled_extent(image.height(), self.resolution_scale);
        self.ensure_target(ctx, width, height);
        self.ensure_reference(ctx, scene, index, width, height);
        let target = match &self.target {
            Some(target) => target,
            None => return,
        };
        let reference = match &self.references[index] {
            Some(reference) => reference,
            None => return,
        };

        let mut encoder = ctx
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Train Iteration Encoder"),
            });

        encoder.clear_buffer(&self.loss_buffer, 0, None);
        cloud.clear_gradients(&mut encoder);

        self.sorter.sort(
            &ctx.device,
            &mut encoder,
            &cloud.positions.values,
            cloud.num_points(),
            &camera.view,
            camera.depth_sign(),
            &mut self.sort_bufs,
        );
        self.renderer.render_with_gradients(
            &ctx.device,
            &mut encoder,
            cloud,
            &self.sort_bufs,
            camera,
            target,
            &reference.buffer,
            &self.loss_buffer,
            &self.settings,
        );
        let token = self
            .readback
            .record_copy(&ctx.device, &mut encoder, &self.loss_buffer);

        self.adam.step(&ctx.device, &mut encoder, &mut cloud.positions);
        self.adam.step(&ctx.device, &mut encoder, &mut cloud.colors);

        let ticket = ctx.submit(encoder.finish());
        self.readback.submitted(token, ticket);
        self.adam.advance();
    }

    fn ensure_target(&mut self, ctx: &GpuContext, width: u32, height: u32) {
        let matches = self
            .target
            .as_ref()
            .map(|t| t.width == width && t.height == height)
            .unwrap_or(false);
        if !matches {
            // The old target may still be bound by in-flight work.
            ctx.wait_idle();
            log::debug!("render target {}x{}", width, height);
            self.target = Some(RenderTarget::new(&ctx.device, width, height));
        }
    }

    fn ensure_reference(
        &mut self,
        ctx: &GpuContext,
        scene: &SplatScene,
        index: usize,
        width: u32,
        height: u32,
    ) {
        let matches = self.references[index]
            .as_ref()
            .map(|r| r.width == width && r.height == height)
            .unwrap_or(false);
        if !matches {
            let (_, image) = scene.train_view(index);
            let data = convert::downsample_to_linear_rgba(image, width, height);
            let buffer = gpu::create_buffer_init(
                &ctx.device,
                "reference image",
                &data,
                BufferUsages::STORAGE,
            );
            self.references[index] = Some(CachedReference {
                buffer,
                width,
                height,
            });
        }
    }
}
