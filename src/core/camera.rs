//! Camera model: a view transform plus a projection transform.
//!
//! Cameras here are deliberately matrix-only. Scene files ship full 4x4 view
//! and projection matrices, so the renderer never needs to know about focal
//! lengths or principal points; everything goes through `projection * view`.

use nalgebra::{Matrix4, Perspective3, Point3, Vector2, Vector3};

/// A camera described by its world-to-camera view matrix and its projection.
#[derive(Clone, Debug)]
pub struct Camera {
    /// World space to camera space.
    pub view: Matrix4<f32>,

    /// Camera space to clip space.
    pub projection: Matrix4<f32>,
}

impl Camera {
    pub fn new(view: Matrix4<f32>, projection: Matrix4<f32>) -> Self {
        Self { view, projection }
    }

    /// Build a right-handed look-at camera with a standard perspective
    /// projection. Convenience for tests and the render tool; scene files
    /// carry their own matrices.
    pub fn look_at(
        eye: Point3<f32>,
        target: Point3<f32>,
        up: Vector3<f32>,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let view = Matrix4::look_at_rh(&eye, &target, &up);
        let projection = Perspective3::new(aspect, fov_y, near, far).to_homogeneous();
        Self { view, projection }
    }

    /// Combined world-to-clip transform.
    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection * self.view
    }

    /// Sign that makes `view_z * depth_sign` increase away from the camera.
    ///
    /// The projection's bottom row determines the convention: a right-handed
    /// projection (nalgebra `Perspective3`, OpenGL style) has `w = -z_view`
    /// and looks down -z, so the depth metric must be negated. A left-handed
    /// / D3D-style projection has `w = +z_view` and needs no flip.
    pub fn depth_sign(&self) -> f32 {
        if self.projection[(3, 2)] >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    /// Depth metric used for sorting: view-space z adjusted by [`Self::depth_sign`].
    pub fn sort_depth(&self, point_world: &Vector3<f32>) -> f32 {
        let cam = self.view * point_world.push(1.0);
        cam.z * self.depth_sign()
    }

    /// Project a world-space point to pixel coordinates for a target of the
    /// given extent. Returns `None` for points at or behind the projection
    /// plane (`clip.w` not meaningfully positive).
    ///
    /// Pixel mapping matches the rasterizer: ndc x in [-1,1] maps to
    /// [0,width], ndc y is flipped so +y in ndc is up but row 0 is the top.
    pub fn project_to_pixel(
        &self,
        point_world: &Vector3<f32>,
        width: u32,
        height: u32,
    ) -> Option<Vector2<f32>> {
        let clip = self.view_projection() * point_world.push(1.0);
        if clip.w <= 1e-6 {
            return None;
        }
        let ndc_x = clip.x / clip.w;
        let ndc_y = clip.y / clip.w;
        Some(Vector2::new(
            (ndc_x * 0.5 + 0.5) * width as f32,
            (1.0 - (ndc_y * 0.5 + 0.5)) * height as f32,
        ))
    }
}
