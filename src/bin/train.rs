//! splatfit-train: fit a point cloud to a scene's reference images.
//!
//! Usage:
//!   splatfit-train --scene path/to/scene.json [--iters N] [--seed U64] ...

use std::path::{Path, PathBuf};

use anyhow::Context;
use image::RgbImage;
use splatfit::gpu::{
    DepthSorter, GpuContext, GpuPointCloud, PointRenderer, RenderSettings, RenderTarget,
    SortBuffers,
};
use splatfit::render::convert;
use splatfit::scene::SplatScene;
use splatfit::{load_scene, TrainConfig, Trainer};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
}

/// Create timestamped run directory
fn create_run_directory() -> std::io::Result<PathBuf> {
    use time::OffsetDateTime;

    // UTC to avoid platform-specific timezone access.
    let now = OffsetDateTime::now_utc();
    let dir_name = format!(
        "runs/{:04}{:02}{:02}_{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute()
    );

    let mut path = PathBuf::from(&dir_name);
    let mut counter = 1;
    while path.exists() {
        path = PathBuf::from(format!("{}.{}", dir_name, counter));
        counter += 1;
    }

    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Save run metadata to text file
fn save_run_metadata(out_dir: &Path, args: &[String], seed: Option<u64>) -> std::io::Result<()> {
    use std::io::Write;
    use std::time::SystemTime;

    let mut file = std::fs::File::create(out_dir.join("run_metadata.txt"))?;
    writeln!(file, "=== Training Run Metadata ===")?;
    writeln!(file)?;
    writeln!(file, "Command:")?;
    writeln!(file, "splatfit-train {}", args[1..].join(" "))?;
    writeln!(file)?;
    writeln!(file, "Started: {:?}", SystemTime::now())?;
    if let Some(seed) = seed {
        writeln!(file, "Seed: {}", seed)?;
    }
    writeln!(file)?;
    writeln!(file, "System:")?;
    writeln!(file, "  Platform: {}", std::env::consts::OS)?;
    writeln!(file, "  Architecture: {}", std::env::consts::ARCH)?;
    writeln!(file, "  Package version: {}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Render one training view at full image resolution and read it back.
fn render_view(
    ctx: &GpuContext,
    cloud: &GpuPointCloud,
    scene: &SplatScene,
    index: usize,
    settings: &RenderSettings,
) -> anyhow::Result<RgbImage> {
    let (camera, image) = scene.train_view(index);
    let (width, height) = (image.width(), image.height());

    let sorter = DepthSorter::new(&ctx.device);
    let renderer = PointRenderer::new(&ctx.device);
    let mut sort_bufs = SortBuffers::new(&ctx.device, cloud.num_points().max(1));
    let target = RenderTarget::new(&ctx.device, width, height);

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Preview Encoder"),
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
        cloud,
        &sort_bufs,
        camera,
        &target,
        settings,
    );
    ctx.submit(encoder.finish());

    let pixels: Vec<f32> = splatfit::gpu::read_buffer_blocking(
        &ctx.device,
        &ctx.queue,
        &target.color,
        (width * height * 4) as usize,
    )?;
    Ok(convert::linear_rgba_to_image(&pixels, width, height))
}

fn usage() {
    eprintln!("Usage:");
    eprintln!("  splatfit-train --scene <scene.json> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --iters N              training iterations (default 2000)");
    eprintln!("  --step-size F          Adam step size (default 0.001)");
    eprintln!("  --resolution-scale F   training resolution fraction (default 0.25)");
    eprintln!("  --point-radius F       splat radius in pixels (default 10)");
    eprintln!("  --draw-fraction F      fraction of sorted points drawn (default 1.0)");
    eprintln!("  --seed U64             fixed camera-picker seed");
    eprintln!("  --log-interval N       iterations between loss logs (default 50)");
    eprintln!("  --out-dir DIR          output directory (default runs/<timestamp>)");
}

fn main() -> anyhow::Result<()> {
    init_logging();
    println!("splatfit-train v{}", splatfit::VERSION);

    let mut scene_path: Option<PathBuf> = None;
    let mut iters: usize = 2000;
    let mut log_interval: usize = 50;
    let mut out_dir: Option<PathBuf> = None;
    let mut config = TrainConfig::default();

    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .with_context(|| format!("{name} needs a value"))
        };
        match a.as_str() {
            "--scene" => scene_path = Some(PathBuf::from(value("--scene")?)),
            "--iters" => iters = value("--iters")?.parse()?,
            "--step-size" => config.step_size = value("--step-size")?.parse()?,
            "--resolution-scale" => config.resolution_scale = value("--resolution-scale")?.parse()?,
            "--point-radius" => config.point_radius = value("--point-radius")?.parse()?,
            "--draw-fraction" => config.draw_fraction = value("--draw-fraction")?.parse()?,
            "--seed" => config.rng_seed = Some(value("--seed")?.parse()?),
            "--log-interval" => log_interval = value("--log-interval")?.parse()?,
            "--out-dir" => out_dir = Some(PathBuf::from(value("--out-dir")?)),
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

    let out_dir = match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            dir
        }
        None => create_run_directory()?,
    };
    let all_args: Vec<String> = std::env::args().collect();
    save_run_metadata(&out_dir, &all_args, config.rng_seed)
        .unwrap_or_else(|e| log::warn!("failed to save run metadata: {e}"));

    let ctx = GpuContext::new_blocking()?;
    let mut cloud = GpuPointCloud::new(&ctx.device, &scene.point_cloud);
    let mut trainer = Trainer::new(&ctx, config);

    log::info!(
        "{} points, {} train views, {} held-out views",
        cloud.num_points(),
        scene.num_train_cameras,
        scene.cameras.len() - scene.num_train_cameras
    );

    if scene.num_train_cameras > 0 {
        let initial = render_view(&ctx, &cloud, &scene, 0, &trainer.settings())?;
        initial.save(out_dir.join("initial.png"))?;
    }

    let start = std::time::Instant::now();
    for iter in 0..iters {
        trainer.step_iteration(&ctx, &mut cloud, &scene);
        if log_interval > 0 && (iter + 1) % log_interval == 0 {
            match trainer.smoothed_loss() {
                Some(loss) => log::info!("iter {:6}  loss {:.6}", iter + 1, loss),
                None => log::info!("iter {:6}  loss pending", iter + 1),
            }
        }
    }
    ctx.wait_idle();
    log::info!(
        "trained {} iterations in {:.1?}",
        trainer.step_count(),
        start.elapsed()
    );

    if scene.num_train_cameras > 0 {
        let final_img = render_view(&ctx, &cloud, &scene, 0, &trainer.settings())?;
        let path = out_dir.join("final.png");
        final_img.save(&path)?;
        log::info!("saved `{}`", path.display());
    }

    Ok(())
}
