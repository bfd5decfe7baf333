//! Device-resident point cloud: one parameter group per optimizable array.

use crate::core::PointCloud;
use crate::gpu::params::ParameterGroup;
use wgpu::{CommandEncoder, Device, Queue};

/// The training state's view of a point cloud: positions (3 channels) and
/// colors (4 channels) as parameter groups, plus a host-side snapshot of the
/// initial data so training can restart without reloading the scene.
pub struct GpuPointCloud {
    pub positions: ParameterGroup,
    pub colors: ParameterGroup,
    num_points: u32,
    initial_positions: Vec<f32>,
    initial_colors: Vec<f32>,
}

impl GpuPointCloud {
    pub fn new(device: &Device, cloud: &PointCloud) -> Self {
        let flat_positions = cloud.flat_positions();
        let flat_colors = cloud.flat_colors();
        let positions = ParameterGroup::new(device, "point positions", 3, &flat_positions);
        let colors = ParameterGroup::new(device, "point colors", 4, &flat_colors);
        Self {
            positions,
            colors,
            num_points: cloud.len() as u32,
            initial_positions: flat_positions,
            initial_colors: flat_colors,
        }
    }

    pub fn num_points(&self) -> u32 {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Record clears of both gradient buffers.
    pub fn clear_gradients(&self, encoder: &mut CommandEncoder) {
        self.positions.clear_gradients(encoder);
        self.colors.clear_gradients(encoder);
    }

    /// Restore the initial parameter values. Optimizer state is separate;
    /// callers pair this with an optimizer reset to restart training.
    pub fn restore_initial(&self, queue: &Queue) {
        self.positions.upload(queue, &self.initial_positions);
        self.colors.upload(queue, &self.initial_colors);
    }
}
