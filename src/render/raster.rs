//! CPU reference implementation of the forward splat rasterizer.
//!
//! Mirrors the compute shader walk step for step (same projection, same
//! footprint, same thresholds, same early-out) so device output can be
//! checked against it. Clarity over speed; device rendering is the fast
//! path.

use crate::core::{math, Camera, PointCloud};
use crate::gpu::{draw_count, RenderSettings};
use nalgebra::{Matrix4, Vector2, Vector3};

/// Smallest composited alpha, one sRGB quantization step.
pub(crate) const ALPHA_CUTOFF: f32 = 0.0039216;
/// Transmittance below this ends the per-pixel walk.
pub(crate) const TRANSMITTANCE_CUTOFF: f32 = 1e-4;
/// Alpha clamp keeping (1 - alpha) invertible in the backward pass.
pub(crate) const ALPHA_CLAMP: f32 = 0.99;

/// Screen-space record of one projected point.
pub(crate) struct Projected {
    pub screen: Vector2<f32>,
    pub ndc: Vector2<f32>,
    pub clip_w: f32,
}

pub(crate) fn project_point(
    view_proj: &Matrix4<f32>,
    p: &Vector3<f32>,
    width: u32,
    height: u32,
) -> Option<Projected> {
    let clip = view_proj * p.push(1.0);
    if clip.w <= 1e-6 {
        return None;
    }
    let ndc_x = clip.x / clip.w;
    let ndc_y = clip.y / clip.w;
    Some(Projected {
        screen: Vector2::new(
            (ndc_x * 0.5 + 0.5) * width as f32,
            (1.0 - (ndc_y * 0.5 + 0.5)) * height as f32,
        ),
        ndc: Vector2::new(ndc_x, ndc_y),
        clip_w: clip.w,
    })
}

/// Depth-sort point indices for `camera`, front first, ties by index.
///
/// Produces the same order as the device sort: the comparison key is the
/// order-preserving bit encoding of the depth metric, and the sort is stable.
pub fn sort_order(cloud: &PointCloud, camera: &Camera) -> Vec<u32> {
    let keys: Vec<u32> = cloud
        .positions
        .iter()
        .map(|p| math::depth_to_sortable(camera.sort_depth(p)))
        .collect();
    let mut order: Vec<u32> = (0..cloud.len() as u32).collect();
    order.sort_by_key(|&i| keys[i as usize]);
    order
}

/// Forward pass returning the RGBA pixel buffer (alpha = remaining
/// transmittance) and the per-pixel contribution counts.
pub(crate) fn forward_cpu(
    cloud: &PointCloud,
    camera: &Camera,
    width: u32,
    height: u32,
    settings: &RenderSettings,
) -> (Vec<f32>, Vec<u32>) {
    let order = sort_order(cloud, camera);
    let num_draw = draw_count(settings.draw_fraction, order.len() as u32) as usize;
    let view_proj = camera.view_projection();
    let r2 = settings.point_radius * settings.point_radius;

    // Projection is per point, not per pixel.
    let projected: Vec<Option<Projected>> = cloud
        .positions
        .iter()
        .map(|p| project_point(&view_proj, p, width, height))
        .collect();

    let num_pixels = (width * height) as usize;
    let mut pixels = vec![0.0f32; num_pixels * 4];
    let mut counts = vec![0u32; num_pixels];

    for y in 0..height {
        for x in 0..width {
            let pixel = Vector2::new(x as f32 + 0.5, y as f32 + 0.5);
            let mut rgb = Vector3::zeros();
            let mut t = 1.0f32;
            let mut count = 0u32;

            for &i in &order[..num_draw] {
                let proj = match &projected[i as usize] {
                    Some(proj) => proj,
                    None => continue,
                };
                let d = pixel - proj.screen;
                let d2 = d.dot(&d);
                if d2 > r2 {
                    continue;
                }
                let falloff = (-4.5 * d2 / r2).exp();
                let c = &cloud.colors[i as usize];
                let alpha = (c.w * falloff).min(ALPHA_CLAMP);
                if alpha < ALPHA_CUTOFF {
                    continue;
                }
                rgb += t * alpha * c.xyz();
                t *= 1.0 - alpha;
                count += 1;
                if t < TRANSMITTANCE_CUTOFF {
                    break;
                }
            }

            let idx = (y * width + x) as usize;
            pixels[idx * 4] = rgb.x + t * settings.background[0];
            pixels[idx * 4 + 1] = rgb.y + t * settings.background[1];
            pixels[idx * 4 + 2] = rgb.z + t * settings.background[2];
            pixels[idx * 4 + 3] = t;
            counts[idx] = count;
        }
    }

    (pixels, counts)
}

/// Render on the CPU. Returns a `width * height` linear RGBA buffer whose
/// alpha channel is the remaining transmittance per pixel.
pub fn render_cpu(
    cloud: &PointCloud,
    camera: &Camera,
    width: u32,
    height: u32,
    settings: &RenderSettings,
) -> Vec<f32> {
    forward_cpu(cloud, camera, width, height, settings).0
}
