//! Device loss and gradient passes validated against the CPU reference.
//!
//! The CPU replay in `render::render_with_gradients_cpu` is itself checked
//! against finite differences elsewhere; here the device pipeline (forward,
//! loss, atomic gradient scatter) must reproduce it. Scenes follow the same
//! smoothness rules as the finite-difference tests so the two sides composite
//! identical point sets at every pixel.

use nalgebra::{Point3, Vector3, Vector4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::BufferUsages;

use splatfit::core::{Camera, PointCloud};
use splatfit::gpu::{
    self, DepthSorter, GpuContext, GpuPointCloud, PointRenderer, RenderSettings, RenderTarget,
    SortBuffers,
};
use splatfit::render::{render_cpu, render_with_gradients_cpu};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 32;

struct GpuBackward {
    loss: f32,
    pixels: Vec<f32>,
    d_positions: Vec<f32>,
    d_colors: Vec<f32>,
}

fn test_camera() -> Camera {
    Camera::look_at(
        Point3::new(0.0, 0.0, 3.0),
        Point3::origin(),
        Vector3::y(),
        std::f32::consts::FRAC_PI_3,
        1.0,
        0.1,
        100.0,
    )
}

fn smooth_settings() -> RenderSettings {
    RenderSettings {
        point_radius: 100.0,
        ..Default::default()
    }
}

fn random_cloud(seed: u64, n: usize) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions = Vec::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    for k in 0..n {
        positions.push(Vector3::new(
            rng.gen_range(-0.4..0.4),
            rng.gen_range(-0.4..0.4),
            -0.6 + 0.4 * k as f32,
        ));
        colors.push(Vector4::new(
            rng.gen_range(0.1..0.9),
            rng.gen_range(0.1..0.9),
            rng.gen_range(0.1..0.9),
            rng.gen_range(0.2..0.5),
        ));
    }
    PointCloud::new(positions, colors)
}

fn random_reference(seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut reference = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
    for _ in 0..WIDTH * HEIGHT {
        reference.push(rng.gen_range(0.0..1.0));
        reference.push(rng.gen_range(0.0..1.0));
        reference.push(rng.gen_range(0.0..1.0));
        reference.push(1.0);
    }
    reference
}

/// Run the full device pipeline for one view and read everything back.
fn run_backward(
    ctx: &GpuContext,
    cloud: &PointCloud,
    camera: &Camera,
    reference: &[f32],
    settings: &RenderSettings,
) -> GpuBackward {
    let gpu_cloud = GpuPointCloud::new(&ctx.device, cloud);
    let sorter = DepthSorter::new(&ctx.device);
    let renderer = PointRenderer::new(&ctx.device);
    let mut sort_bufs = SortBuffers::new(&ctx.device, 1);
    let target = RenderTarget::new(&ctx.device, WIDTH, HEIGHT);
    let reference_buf =
        gpu::create_buffer_init(&ctx.device, "reference image", reference, BufferUsages::STORAGE);
    let loss_buf = gpu::create_buffer(
        &ctx.device,
        "loss cell",
        4,
        BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
    );

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.clear_buffer(&loss_buf, 0, None);
    gpu_cloud.clear_gradients(&mut encoder);
    sorter.sort(
        &ctx.device,
        &mut encoder,
        &gpu_cloud.positions.values,
        gpu_cloud.num_points(),
        &camera.view,
        camera.depth_sign(),
        &mut sort_bufs,
    );
    renderer.render_with_gradients(
        &ctx.device,
        &mut encoder,
        &gpu_cloud,
        &sort_bufs,
        camera,
        &target,
        &reference_buf,
        &loss_buf,
        settings,
    );
    ctx.submit(encoder.finish());
    ctx.wait_idle();

    let loss = gpu::read_buffer_blocking::<f32>(&ctx.device, &ctx.queue, &loss_buf, 1)
        .expect("loss readback")[0];
    let pixels = gpu::read_buffer_blocking(
        &ctx.device,
        &ctx.queue,
        &target.color,
        (WIDTH * HEIGHT * 4) as usize,
    )
    .expect("pixel readback");
    let n = cloud.len();
    let d_positions = if n == 0 {
        Vec::new()
    } else {
        gpu::read_buffer_blocking(&ctx.device, &ctx.queue, &gpu_cloud.positions.gradients, n * 3)
            .expect("position gradient readback")
    };
    let d_colors = if n == 0 {
        Vec::new()
    } else {
        gpu::read_buffer_blocking(&ctx.device, &ctx.queue, &gpu_cloud.colors.gradients, n * 4)
            .expect("color gradient readback")
    };

    GpuBackward {
        loss,
        pixels,
        d_positions,
        d_colors,
    }
}

fn assert_close(gpu: f32, cpu: f32, what: &str) {
    let denom = gpu.abs().max(cpu.abs()).max(1e-6);
    assert!(
        (gpu - cpu).abs() < 1e-3 || (gpu - cpu).abs() / denom < 1e-2,
        "{what}: gpu={gpu} cpu={cpu}"
    );
}

#[test]
fn test_gpu_gradients_match_cpu() {
    let ctx = match GpuContext::new_blocking() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    let camera = test_camera();
    let cloud = random_cloud(0x6AD5, 4);
    let reference = random_reference(0x4EF5);
    let settings = smooth_settings();

    let out = run_backward(&ctx, &cloud, &camera, &reference, &settings);
    let (_, cpu) =
        render_with_gradients_cpu(&cloud, &camera, WIDTH, HEIGHT, &reference, &settings);

    assert_close(out.loss, cpu.loss, "loss");
    for i in 0..cloud.len() {
        for axis in 0..3 {
            assert_close(
                out.d_positions[i * 3 + axis],
                cpu.d_positions[i][axis],
                &format!("d_position point {i} axis {axis}"),
            );
        }
        for ch in 0..4 {
            assert_close(
                out.d_colors[i * 4 + ch],
                cpu.d_colors[i][ch],
                &format!("d_color point {i} channel {ch}"),
            );
        }
    }
}

#[test]
fn test_empty_cloud_reports_zero_loss() {
    let ctx = match GpuContext::new_blocking() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    let settings = RenderSettings {
        background: [1.0, 1.0, 1.0, 1.0],
        ..Default::default()
    };
    // Reference disagrees with the background everywhere, but with no points
    // the loss pass never runs and the cleared cell reads back zero.
    let reference = vec![0.0f32; (WIDTH * HEIGHT * 4) as usize];

    let out = run_backward(
        &ctx,
        &PointCloud::default(),
        &test_camera(),
        &reference,
        &settings,
    );

    assert_eq!(out.loss, 0.0);
    for chunk in out.pixels.chunks(4) {
        assert_eq!(chunk, &[1.0, 1.0, 1.0, 1.0]);
    }
}

#[test]
fn test_matching_reference_gives_near_zero_gradients() {
    let ctx = match GpuContext::new_blocking() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    let camera = test_camera();
    let cloud = PointCloud::new(
        vec![Vector3::zeros()],
        vec![Vector4::new(1.0, 0.0, 0.0, 1.0)],
    );
    let settings = smooth_settings();

    // Reference equal to the render: the optimum, so loss and gradients
    // collapse to float noise.
    let reference = render_cpu(&cloud, &camera, WIDTH, HEIGHT, &settings);
    let out = run_backward(&ctx, &cloud, &camera, &reference, &settings);
    assert!(out.loss < 1e-6, "loss at the optimum: {}", out.loss);
    for (i, g) in out.d_positions.iter().chain(&out.d_colors).enumerate() {
        assert!(g.abs() < 1e-3, "gradient {i} at the optimum: {g}");
    }

    // A mismatched reference must register as real error.
    let black = vec![0.0f32; (WIDTH * HEIGHT * 4) as usize];
    let out = run_backward(&ctx, &cloud, &camera, &black, &settings);
    assert!(out.loss > 0.01, "loss against black: {}", out.loss);
}

#[test]
fn test_clamped_alpha_freezes_position_and_alpha() {
    let ctx = match GpuContext::new_blocking() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    let camera = test_camera();
    // Radius so large the falloff stays above the clamp threshold at every
    // pixel: alpha is pinned to 0.99 across the whole image.
    let cloud = PointCloud::new(
        vec![Vector3::zeros()],
        vec![Vector4::new(1.0, 0.0, 0.0, 1.0)],
    );
    let settings = RenderSettings {
        point_radius: 1000.0,
        ..Default::default()
    };
    let reference = vec![0.3f32; (WIDTH * HEIGHT * 4) as usize];

    let out = run_backward(&ctx, &cloud, &camera, &reference, &settings);
    let (_, cpu) =
        render_with_gradients_cpu(&cloud, &camera, WIDTH, HEIGHT, &reference, &settings);

    // Clamped contributions scatter color gradients but freeze alpha and
    // position, so those buffers never receive a single add.
    assert!(out.d_positions.iter().all(|&g| g == 0.0));
    assert_eq!(out.d_colors[3], 0.0);
    assert!(out.d_colors[0].abs() > 0.1, "red gradient should be live");
    assert_close(out.d_colors[0], cpu.d_colors[0][0], "clamped red gradient");
    assert_close(out.loss, cpu.loss, "clamped loss");
}
