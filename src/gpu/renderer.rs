//! Compute rasterizer for sorted point splats, with loss and gradient passes.

use crate::core::Camera;
use crate::gpu::cloud::GpuPointCloud;
use crate::gpu::sort::SortBuffers;
use crate::gpu::{buffers, matrix_to_gpu, storage_entry, uniform_entry};
use wgpu::util::DeviceExt;
use wgpu::*;

/// Render resolution and the per-pixel buffers the passes write.
///
/// `color` holds linear RGB plus remaining transmittance in alpha.
/// `contrib_counts` records how many points the forward walk composited at
/// each pixel; the gradient pass replays exactly that many.
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
    pub color: Buffer,
    pub contrib_counts: Buffer,
}

impl RenderTarget {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "render target must be non-empty");
        let pixels = (width as u64) * (height as u64);
        Self {
            width,
            height,
            color: buffers::create_buffer(
                device,
                "render target color",
                pixels * 16,
                BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            ),
            contrib_counts: buffers::create_buffer(
                device,
                "render target contrib counts",
                pixels * 4,
                BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            ),
        }
    }

    pub fn num_pixels(&self) -> u32 {
        self.width * self.height
    }
}

/// Knobs shared by the forward and backward passes.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    /// Splat footprint radius in pixels. Must be positive.
    pub point_radius: f32,
    /// Fraction of the sorted list to draw, front first.
    pub draw_fraction: f32,
    /// Composited behind the points; alpha is ignored.
    pub background: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            point_radius: 10.0,
            draw_fraction: 1.0,
            background: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// First K of N sorted points for a draw fraction.
pub fn draw_count(fraction: f32, num_points: u32) -> u32 {
    let k = (fraction.clamp(0.0, 1.0) * num_points as f32).floor() as u32;
    k.min(num_points)
}

pub struct PointRenderer {
    forward_pipeline: ComputePipeline,
    forward_bind_group_layout: BindGroupLayout,
    loss_pipeline: ComputePipeline,
    loss_bind_group_layout: BindGroupLayout,
    scatter_pipeline: ComputePipeline,
    scatter_bind_group_layout: BindGroupLayout,
}

impl PointRenderer {
    pub fn new(device: &Device) -> Self {
        let forward_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Forward Render Shader"),
            source: ShaderSource::Wgsl(include_str!("forward.wgsl").into()),
        });
        let backward_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Backward Render Shader"),
            source: ShaderSource::Wgsl(include_str!("backward.wgsl").into()),
        });

        let forward_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Forward Render Bind Group Layout"),
                entries: &[
                    uniform_entry(0),
                    storage_entry(1, true),  // positions
                    storage_entry(2, true),  // colors
                    storage_entry(3, true),  // sorted order
                    storage_entry(4, false), // output pixels
                    storage_entry(5, false), // contribution counts
                ],
            });
        // Slot numbers match the shared declarations in backward.wgsl; each
        // layout lists only the slots its entry point reads.
        let loss_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Loss Bind Group Layout"),
                entries: &[
                    uniform_entry(0),
                    storage_entry(4, true),  // output pixels
                    storage_entry(5, true),  // reference image
                    storage_entry(9, false), // loss accumulator
                ],
            });
        // Exactly eight storage buffers, the default device limit.
        let scatter_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Gradient Scatter Bind Group Layout"),
                entries: &[
                    uniform_entry(0),
                    storage_entry(1, true),  // positions
                    storage_entry(2, true),  // colors
                    storage_entry(3, true),  // sorted order
                    storage_entry(4, true),  // output pixels
                    storage_entry(5, true),  // reference image
                    storage_entry(6, true),  // contribution counts
                    storage_entry(7, false), // position gradients
                    storage_entry(8, false), // color gradients
                ],
            });

        let make_pipeline = |label: &str,
                             layout: &BindGroupLayout,
                             module: &ShaderModule,
                             entry_point: &str| {
            let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point,
            })
        };

        Self {
            forward_pipeline: make_pipeline(
                "Forward Render Pipeline",
                &forward_bind_group_layout,
                &forward_shader,
                "render_forward",
            ),
            loss_pipeline: make_pipeline(
                "Loss Pipeline",
                &loss_bind_group_layout,
                &backward_shader,
                "compute_loss",
            ),
            scatter_pipeline: make_pipeline(
                "Gradient Scatter Pipeline",
                &scatter_bind_group_layout,
                &backward_shader,
                "scatter_gradients",
            ),
            forward_bind_group_layout,
            loss_bind_group_layout,
            scatter_bind_group_layout,
        }
    }

    /// Record the forward pass: composite the sorted points over the
    /// background into `target`. Zero points still dispatches and fills the
    /// target with the background at full transmittance.
    pub fn render(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        cloud: &GpuPointCloud,
        order: &SortBuffers,
        camera: &Camera,
        target: &RenderTarget,
        settings: &RenderSettings,
    ) {
        let params = self.params_buffer(device, order, camera, target, settings);
        self.record_forward(device, encoder, &params, cloud, order, target);
    }

    /// Record forward, loss, and gradient passes in sequence.
    ///
    /// The caller must clear `loss` and the cloud's gradient buffers earlier
    /// in the same encoder. `reference` is a `width * height` image of linear
    /// RGBA float pixels; `loss` is a single float cell that receives the
    /// mean squared pixel error. With zero points only the forward clear
    /// runs: the loss and scatter passes are skipped and the loss cell stays
    /// at its cleared zero.
    #[allow(clippy::too_many_arguments)]
    pub fn render_with_gradients(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        cloud: &GpuPointCloud,
        order: &SortBuffers,
        camera: &Camera,
        target: &RenderTarget,
        reference: &Buffer,
        loss: &Buffer,
        settings: &RenderSettings,
    ) {
        let params = self.params_buffer(device, order, camera, target, settings);
        self.record_forward(device, encoder, &params, cloud, order, target);
        if order.is_empty() {
            return;
        }

        let loss_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Loss Bind Group"),
            layout: &self.loss_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: target.color.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: reference.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 9,
                    resource: loss.as_entire_binding(),
                },
            ],
        });
        let scatter_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Gradient Scatter Bind Group"),
            layout: &self.scatter_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: cloud.positions.values.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: cloud.colors.values.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: order.sorted_indices().as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: target.color.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: reference.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 6,
                    resource: target.contrib_counts.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 7,
                    resource: cloud.positions.gradients.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 8,
                    resource: cloud.colors.gradients.as_entire_binding(),
                },
            ],
        });

        let groups_x = (target.width + 15) / 16;
        let groups_y = (target.height + 15) / 16;
        for (pipeline, bind_group, label) in [
            (&self.loss_pipeline, &loss_bind_group, "Loss Pass"),
            (
                &self.scatter_pipeline,
                &scatter_bind_group,
                "Gradient Scatter Pass",
            ),
        ] {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
    }

    fn params_buffer(
        &self,
        device: &Device,
        order: &SortBuffers,
        camera: &Camera,
        target: &RenderTarget,
        settings: &RenderSettings,
    ) -> Buffer {
        debug_assert!(settings.point_radius > 0.0);
        let params = RenderParams {
            view_proj: matrix_to_gpu(&camera.view_projection()),
            background: settings.background,
            width: target.width,
            height: target.height,
            num_draw: draw_count(settings.draw_fraction, order.len()),
            point_radius: settings.point_radius,
        };
        device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("Render Params"),
            contents: bytemuck::cast_slice(&[params]),
            usage: BufferUsages::UNIFORM,
        })
    }

    fn record_forward(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        params: &Buffer,
        cloud: &GpuPointCloud,
        order: &SortBuffers,
        target: &RenderTarget,
    ) {
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Forward Render Bind Group"),
            layout: &self.forward_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: cloud.positions.values.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: cloud.colors.values.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: order.sorted_indices().as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: target.color.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: target.contrib_counts.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Forward Render Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.forward_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((target.width + 15) / 16, (target.height + 15) / 16, 1);
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RenderParams {
    view_proj: [[f32; 4]; 4],
    background: [f32; 4],
    width: u32,
    height: u32,
    num_draw: u32,
    point_radius: f32,
}
