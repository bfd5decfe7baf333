//! Host-side point cloud: positions plus RGBA colors.

use nalgebra::{Vector3, Vector4};

/// An ordered collection of splats. Position and color counts always match;
/// zero points is a valid cloud.
#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    pub positions: Vec<Vector3<f32>>,
    pub colors: Vec<Vector4<f32>>,
}

impl PointCloud {
    /// Build a cloud from parallel position/color arrays.
    ///
    /// Panics if the lengths disagree; loaders validate counts before
    /// constructing a cloud, so a mismatch here is a programming error.
    pub fn new(positions: Vec<Vector3<f32>>, colors: Vec<Vector4<f32>>) -> Self {
        assert_eq!(
            positions.len(),
            colors.len(),
            "point cloud position/color count mismatch"
        );
        Self { positions, colors }
    }

    /// Build a cloud from RGB colors, filling alpha with 1.0.
    pub fn from_rgb(positions: Vec<Vector3<f32>>, colors_rgb: &[Vector3<f32>]) -> Self {
        let colors = colors_rgb
            .iter()
            .map(|c| Vector4::new(c.x, c.y, c.z, 1.0))
            .collect();
        Self::new(positions, colors)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions as a flat float array (3 per point), the layout parameter
    /// buffers use on the device.
    pub fn flat_positions(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.positions.len() * 3);
        for p in &self.positions {
            out.extend_from_slice(&[p.x, p.y, p.z]);
        }
        out
    }

    /// Colors as a flat float array (4 per point).
    pub fn flat_colors(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.colors.len() * 4);
        for c in &self.colors {
            out.extend_from_slice(&[c.x, c.y, c.z, c.w]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb_fills_alpha() {
        let cloud = PointCloud::from_rgb(
            vec![Vector3::new(1.0, 2.0, 3.0)],
            &[Vector3::new(0.5, 0.25, 0.125)],
        );
        assert_eq!(cloud.colors[0], Vector4::new(0.5, 0.25, 0.125, 1.0));
    }

    #[test]
    fn test_flat_layout() {
        let cloud = PointCloud::from_rgb(
            vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0)],
            &[Vector3::new(0.1, 0.2, 0.3), Vector3::new(0.4, 0.5, 0.6)],
        );
        assert_eq!(cloud.flat_positions(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(cloud.flat_colors().len(), 8);
        assert_eq!(cloud.flat_colors()[3], 1.0);
        assert_eq!(cloud.flat_colors()[4], 0.4);
    }

    #[test]
    #[should_panic(expected = "count mismatch")]
    fn test_mismatched_counts_panic() {
        PointCloud::new(vec![Vector3::zeros()], vec![]);
    }

    #[test]
    fn test_empty_cloud_is_valid() {
        let cloud = PointCloud::default();
        assert!(cloud.is_empty());
        assert!(cloud.flat_positions().is_empty());
    }
}
