//! splatfit-render: render one scene view to a PNG.
//!
//! Usage:
//!   splatfit-render --scene path/to/scene.json --out view.png [--camera N]

use std::path::PathBuf;

use anyhow::Context;
use splatfit::gpu::{
    DepthSorter, GpuContext, GpuPointCloud, PointRenderer, RenderSettings, RenderTarget,
    SortBuffers,
};
use splatfit::load_scene;
use splatfit::render::convert;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
}

fn parse_background(text: &str) -> anyhow::Result<[f32; 4]> {
    let parts: Vec<f32> = text
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<Result<_, _>>()
        .context("--background must be three comma-separated floats (e.g. 0.5,0.5,0.5)")?;
    anyhow::ensure!(parts.len() == 3, "--background needs exactly three values");
    Ok([parts[0], parts[1], parts[2], 1.0])
}

fn usage() {
    eprintln!("Usage:");
    eprintln!("  splatfit-render --scene <scene.json> [--out view.png] [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --camera N            camera index (default 0)");
    eprintln!("  --test                index into the held-out cameras instead");
    eprintln!("  --scale F             resolution fraction of the view's image (default 1.0)");
    eprintln!("  --background R,G,B    background color in linear RGB (default 0,0,0)");
    eprintln!("  --point-radius F      splat radius in pixels (default 10)");
    eprintln!("  --draw-fraction F     fraction of sorted points drawn (default 1.0)");
}

fn main() -> anyhow::Result<()> {
    init_logging();
    println!("splatfit-render v{}", splatfit::VERSION);

    let mut scene_path: Option<PathBuf> = None;
    let mut out_path = PathBuf::from("view.png");
    let mut camera_index: usize = 0;
    let mut use_test_cameras = false;
    let mut scale: f32 = 1.0;
    let mut settings = RenderSettings::default();

    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .with_context(|| format!("{name} needs a value"))
        };
        match a.as_str() {
            "--scene" => scene_path = Some(PathBuf::from(value("--scene")?)),
            "--out" => out_path = PathBuf::from(value("--out")?),
            "--camera" => camera_index = value("--camera")?.parse()?,
            "--test" => use_test_cameras = true,
            "--scale" => scale = value("--scale")?.parse()?,
            "--background" => settings.background = parse_background(&value("--background")?)?,
            "--point-radius" => settings.point_radius = value("--point-radius")?.parse()?,
            "--draw-fraction" => settings.draw_fraction = value("--draw-fraction")?.parse()?,
            "--help" | "-h" => {
                usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown arg: {other}");
                usage();
                std::process::exit(2);
            }
        }
    }

    let scene_path = scene_path.context("missing --scene <scene.json> (see --help)")?;
    let scene = load_scene(&scene_path)
        .with_context(|| format!("loading scene `{}`", scene_path.display()))?;

    let index = if use_test_cameras {
        scene.num_train_cameras + camera_index
    } else {
        camera_index
    };
    anyhow::ensure!(
        index < scene.cameras.len(),
        "camera index {} out of range ({} cameras)",
        index,
        scene.cameras.len()
    );
    let camera = &scene.cameras[index];
    let image = &scene.images[index];
    let width = ((image.width() as f32) * scale).round().max(1.0) as u32;
    let height = ((image.height() as f32) * scale).round().max(1.0) as u32;

    let ctx = GpuContext::new_blocking()?;
    let cloud = GpuPointCloud::new(&ctx.device, &scene.point_cloud);
    let sorter = DepthSorter::new(&ctx.device);
    let renderer = PointRenderer::new(&ctx.device);
    let mut sort_bufs = SortBuffers::new(&ctx.device, cloud.num_points().max(1));
    let target = RenderTarget::new(&ctx.device, width, height);

    log::info!(
        "rendering view {} (`{}`) at {}x{} with {} points",
        index,
        scene.image_names[index],
        width,
        height,
        cloud.num_points()
    );

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });
    sorter.sort(
        &ctx.device,
        &mut encoder,
        &cloud.positions.values,
        cloud.num_points(),
        &camera.view,
        camera.depth_sign(),
        &mut sort_bufs,
    );
    renderer.render(
        &ctx.device,
        &mut encoder,
        &cloud,
        &sort_bufs,
        camera,
        &target,
        &settings,
    );
    ctx.submit(encoder.finish());

    let pixels: Vec<f32> = splatfit::gpu::read_buffer_blocking(
        &ctx.device,
        &ctx.queue,
        &target.color,
        (width * height * 4) as usize,
    )?;
    convert::linear_rgba_to_image(&pixels, width, height).save(&out_path)?;
    log::info!("saved `{}`", out_path.display());

    Ok(())
}
