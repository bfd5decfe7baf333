//! CPU reference for the loss and gradient scatter passes.
//!
//! Follows the same checkpointed replay as the device shader: the forward
//! image and per-pixel contribution counts are computed first, then each
//! pixel re-walks the sorted list recomputing transmittance and stops after
//! the counted number of contributions. Gradients accumulate into
//! thread-local buffers that are reduced at the end.

use crate::core::{Camera, PointCloud};
use crate::gpu::{draw_count, RenderSettings};
use crate::render::raster::{self, Projected, ALPHA_CLAMP, ALPHA_CUTOFF};
use nalgebra::{Vector2, Vector3, Vector4};
use rayon::prelude::*;

/// Loss and parameter gradients for one view.
pub struct CpuGradients {
    /// Mean squared pixel error against the reference.
    pub loss: f32,
    pub d_positions: Vec<Vector3<f32>>,
    pub d_colors: Vec<Vector4<f32>>,
}

struct ThreadGrads {
    loss: f32,
    d_positions: Vec<Vector3<f32>>,
    d_colors: Vec<Vector4<f32>>,
}

impl ThreadGrads {
    fn new(num_points: usize) -> Self {
        Self {
            loss: 0.0,
            d_positions: vec![Vector3::zeros(); num_points],
            d_colors: vec![Vector4::zeros(); num_points],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.loss += other.loss;
        for (a, b) in self.d_positions.iter_mut().zip(&other.d_positions) {
            *a += b;
        }
        for (a, b) in self.d_colors.iter_mut().zip(&other.d_colors) {
            *a += b;
        }
        self
    }
}

/// Forward render plus loss and gradients against a linear RGBA reference
/// buffer of the same resolution.
///
/// Zero points match the device contract: the background image is produced
/// but the backward pass never runs, so the loss is exactly zero.
pub fn render_with_gradients_cpu(
    cloud: &PointCloud,
    camera: &Camera,
    width: u32,
    height: u32,
    reference: &[f32],
    settings: &RenderSettings,
) -> (Vec<f32>, CpuGradients) {
    let num_pixels = (width * height) as usize;
    assert_eq!(reference.len(), num_pixels * 4);

    let (pixels, counts) = raster::forward_cpu(cloud, camera, width, height, settings);
    if cloud.is_empty() {
        return (
            pixels,
            CpuGradients {
                loss: 0.0,
                d_positions: Vec::new(),
                d_colors: Vec::new(),
            },
        );
    }

    let order = raster::sort_order(cloud, camera);
    let num_draw = draw_count(settings.draw_fraction, order.len() as u32) as usize;
    let view_proj = camera.view_projection();
    let r2 = settings.point_radius * settings.point_radius;
    let projected: Vec<Option<Projected>> = cloud
        .positions
        .iter()
        .map(|p| raster::project_point(&view_proj, p, width, height))
        .collect();

    // First three rows of the view-projection, for the NDC chain rule.
    let row0 = Vector3::new(view_proj[(0, 0)], view_proj[(0, 1)], view_proj[(0, 2)]);
    let row1 = Vector3::new(view_proj[(1, 0)], view_proj[(1, 1)], view_proj[(1, 2)]);
    let row3 = Vector3::new(view_proj[(3, 0)], view_proj[(3, 1)], view_proj[(3, 2)]);

    let pixel_norm = num_pixels as f32;
    let num_points = cloud.len();

    let grads = (0..num_pixels)
        .into_par_iter()
        .fold(
            || ThreadGrads::new(num_points),
            |mut acc, idx| {
                let x = (idx as u32) % width;
                let y = (idx as u32) / width;
                let final_rgb = Vector3::new(
                    pixels[idx * 4],
                    pixels[idx * 4 + 1],
                    pixels[idx * 4 + 2],
                );
                let diff = final_rgb
                    - Vector3::new(
                        reference[idx * 4],
                        reference[idx * 4 + 1],
                        reference[idx * 4 + 2],
                    );
                acc.loss += diff.dot(&diff) / pixel_norm;

                let target_count = counts[idx];
                if target_count == 0 {
                    return acc;
                }
                let dldc = 2.0 * diff / pixel_norm;
                let pixel = Vector2::new(x as f32 + 0.5, y as f32 + 0.5);

                let mut t = 1.0f32;
                let mut accum = Vector3::zeros();
                let mut processed = 0u32;

                for &i in &order[..num_draw] {
                    let i = i as usize;
                    let proj = match &projected[i] {
                        Some(proj) => proj,
                        None => continue,
                    };
                    let d = pixel - proj.screen;
                    let d2 = d.dot(&d);
                    if d2 > r2 {
                        continue;
                    }
                    let falloff = (-4.5 * d2 / r2).exp();
                    let c = cloud.colors[i];
                    let alpha = (c.w * falloff).min(ALPHA_CLAMP);
                    if alpha < ALPHA_CUTOFF {
                        continue;
                    }

                    // Everything after this point, background included,
                    // carries a (1 - alpha) factor of this point.
                    let contrib = t * alpha * c.xyz();
                    let s_after = final_rgb - accum - contrib;

                    let d_rgb = dldc * alpha * t;
                    acc.d_colors[i].x += d_rgb.x;
                    acc.d_colors[i].y += d_rgb.y;
                    acc.d_colors[i].z += d_rgb.z;

                    let d_alpha = dldc.dot(&(c.xyz() * t - s_after / (1.0 - alpha)));

                    // Inside the alpha clamp the footprint and color alpha
                    // stop influencing the output.
                    if c.w * falloff < ALPHA_CLAMP {
                        acc.d_colors[i].w += d_alpha * falloff;

                        let d_screen = d_alpha * c.w * falloff * (9.0 / r2) * d;
                        let d_ndc = Vector2::new(
                            d_screen.x * 0.5 * width as f32,
                            -d_screen.y * 0.5 * height as f32,
                        );
                        let d_pos = (d_ndc.x * (row0 - proj.ndc.x * row3)
                            + d_ndc.y * (row1 - proj.ndc.y * row3))
                            / proj.clip_w;
                        acc.d_positions[i] += d_pos;
                    }

                    accum += contrib;
                    t *= 1.0 - alpha;
                    processed += 1;
                    if processed == target_count {
                        break;
                    }
                }
                acc
            },
        )
        .reduce(|| ThreadGrads::new(num_points), ThreadGrads::merge);

    (
        pixels,
        CpuGradients {
            loss: grads.loss,
            d_positions: grads.d_positions,
            d_colors: grads.d_colors,
        },
    )
}
