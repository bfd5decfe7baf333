//! Gradient checking for the rasterizer backward pass.
//!
//! Analytical gradients from the checkpointed replay are compared against
//! central finite differences of the rendered loss. Scenes are set up so the
//! loss is smooth around the evaluation point: footprints cover the whole
//! image (no footprint edge ever crosses a pixel center), alphas sit between
//! the compositing cutoff and the clamp, and depths are spaced so no
//! perturbation can reorder the sort.

#[cfg(test)]
mod tests {
    use nalgebra::{Point3, Vector3, Vector4};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use splatfit::core::{Camera, PointCloud};
    use splatfit::gpu::RenderSettings;
    use splatfit::render::{render_cpu, render_with_gradients_cpu};

    const WIDTH: u32 = 32;
    const HEIGHT: u32 = 32;

    fn rel_err(a: f32, b: f32) -> f32 {
        let denom = a.abs().max(b.abs()).max(1e-6);
        (a - b).abs() / denom
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
            // Larger than any pixel-to-point distance in these scenes, so
            // the footprint indicator never flips under perturbation.
            point_radius: 100.0,
            ..Default::default()
        }
    }

    /// Random cloud with depths spaced far enough apart that a finite
    /// difference step cannot change the sort order, and alphas away from
    /// both the compositing cutoff and the clamp.
    fn random_cloud(rng: &mut StdRng, n: usize) -> PointCloud {
        let mut positions = Vec::with_capacity(n);
        let mut colors = Vec::with_capacity(n);
        for k in 0..n {
            positions.push(Vector3::new(
                rng.gen_range(-0.4..0.4),
                rng.gen_range(-0.4..0.4),
                -0.6 + 0.4 * k as f32 + rng.gen_range(-0.05..0.05),
            ));
            colors.push(Vector4::new(
                rng.gen_range(0.1..0.9),
                rng.gen_range(0.1..0.9),
                rng.gen_range(0.1..0.9),
                rng.gen_range(0.3..0.7),
            ));
        }
        PointCloud::new(positions, colors)
    }

    fn random_reference(rng: &mut StdRng) -> Vec<f32> {
        let mut reference = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
        for _ in 0..WIDTH * HEIGHT {
            reference.push(rng.gen_range(0.0..1.0));
            reference.push(rng.gen_range(0.0..1.0));
            reference.push(rng.gen_range(0.0..1.0));
            reference.push(1.0);
        }
        reference
    }

    /// The scalar the backward pass differentiates: mean over pixels of the
    /// squared RGB error. Accumulated in f64 so central differences of
    /// nearby f32 renders stay usable.
    fn loss_of(
        cloud: &PointCloud,
        camera: &Camera,
        reference: &[f32],
        settings: &RenderSettings,
    ) -> f64 {
        let pixels = render_cpu(cloud, camera, WIDTH, HEIGHT, settings);
        let mut sum = 0.0f64;
        for i in 0..(WIDTH * HEIGHT) as usize {
            for ch in 0..3 {
                let d = (pixels[i * 4 + ch] - reference[i * 4 + ch]) as f64;
                sum += d * d;
            }
        }
        sum / ((WIDTH * HEIGHT) as f64)
    }

    #[test]
    fn test_color_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(0xC010_25AD);
        let camera = test_camera();
        let settings = smooth_settings();

        for round in 0..4 {
            let n = 1 + round;
            let cloud = random_cloud(&mut rng, n);
            let reference = random_reference(&mut rng);

            let (_, grads) =
                render_with_gradients_cpu(&cloud, &camera, WIDTH, HEIGHT, &reference, &settings);

            let eps = 1e-2f32;
            for i in 0..n {
                for ch in 0..4 {
                    let mut plus = cloud.clone();
                    let mut minus = cloud.clone();
                    plus.colors[i][ch] += eps;
                    minus.colors[i][ch] -= eps;

                    let num = ((loss_of(&plus, &camera, &reference, &settings)
                        - loss_of(&minus, &camera, &reference, &settings))
                        / (2.0 * eps as f64)) as f32;
                    let ana = grads.d_colors[i][ch];
                    assert!(
                        rel_err(num, ana) < 1e-2 || (num - ana).abs() < 1e-4,
                        "color grad mismatch round={round} point={i} ch={ch}: \
                         num={num} ana={ana} rel_err={}",
                        rel_err(num, ana)
                    );
                }
            }
        }
    }

    #[test]
    fn test_position_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(0x0705_17E5);
        let camera = test_camera();
        let settings = smooth_settings();

        for round in 0..4 {
            let n = 1 + round;
            let cloud = random_cloud(&mut rng, n);
            let reference = random_reference(&mut rng);

            let (_, grads) =
                render_with_gradients_cpu(&cloud, &camera, WIDTH, HEIGHT, &reference, &settings);

            // Small enough to never reorder the 0.4-spaced depth slots.
            let eps = 5e-3f32;
            for i in 0..n {
                for axis in 0..3 {
                    let mut plus = cloud.clone();
                    let mut minus = cloud.clone();
                    plus.positions[i][axis] += eps;
                    minus.positions[i][axis] -= eps;

                    let num = ((loss_of(&plus, &camera, &reference, &settings)
                        - loss_of(&minus, &camera, &reference, &settings))
                        / (2.0 * eps as f64)) as f32;
                    let ana = grads.d_positions[i][axis];
                    assert!(
                        rel_err(num, ana) < 1e-2 || (num - ana).abs() < 1e-4,
                        "position grad mismatch round={round} point={i} axis={axis}: \
                         num={num} ana={ana} rel_err={}",
                        rel_err(num, ana)
                    );
                }
            }
        }
    }

    #[test]
    fn test_reported_loss_matches_definition() {
        let mut rng = StdRng::seed_from_u64(0x1055_DEF0);
        let camera = test_camera();
        let settings = smooth_settings();
        let cloud = random_cloud(&mut rng, 3);
        let reference = random_reference(&mut rng);

        let (_, grads) =
            render_with_gradients_cpu(&cloud, &camera, WIDTH, HEIGHT, &reference, &settings);
        let expected = loss_of(&cloud, &camera, &reference, &settings) as f32;

        assert!(grads.loss > 0.0);
        assert!(
            rel_err(grads.loss, expected) < 1e-4,
            "loss mismatch: reported={} recomputed={}",
            grads.loss,
            expected
        );
    }

    #[test]
    fn test_undrawn_point_gets_no_gradient() {
        // Drawing half of two points keeps only the front one; the replay
        // must honor the same cut, so the dropped point stays at zero.
        let cloud = PointCloud::new(
            vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, -1.0)],
            vec![
                Vector4::new(0.2, 0.9, 0.1, 0.8),
                Vector4::new(0.9, 0.1, 0.1, 0.8),
            ],
        );
        let camera = test_camera();
        let settings = RenderSettings {
            draw_fraction: 0.5,
            ..smooth_settings()
        };
        let reference = vec![0.5f32; (WIDTH * HEIGHT * 4) as usize];

        let (_, grads) =
            render_with_gradients_cpu(&cloud, &camera, WIDTH, HEIGHT, &reference, &settings);

        assert!(grads.d_colors[0].norm() > 0.0);
        assert_eq!(grads.d_colors[1].norm(), 0.0);
        assert_eq!(grads.d_positions[1].norm(), 0.0);
    }

    #[test]
    fn test_point_below_alpha_cutoff_gets_no_gradient() {
        // An alpha below one sRGB quantization step never composites, so
        // neither the forward image nor the gradients see the point.
        let cloud = PointCloud::new(
            vec![Vector3::zeros()],
            vec![Vector4::new(0.9, 0.9, 0.9, 0.003)],
        );
        let camera = test_camera();
        let settings = smooth_settings();
        let reference = vec![0.25f32; (WIDTH * HEIGHT * 4) as usize];

        let (pixels, grads) =
            render_with_gradients_cpu(&cloud, &camera, WIDTH, HEIGHT, &reference, &settings);

        assert_eq!(pixels[0], 0.0, "background should pass through untouched");
        assert_eq!(grads.d_colors[0].norm(), 0.0);
        assert_eq!(grads.d_positions[0].norm(), 0.0);
        assert!(grads.loss > 0.0);
    }
}
