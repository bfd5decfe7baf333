//! Device-side training pipeline built on wgpu compute.
//!
//! - `context` - device/queue plus the submission completion timeline
//! - `buffers` - buffer creation and readback helpers
//! - `params` - trainable parameter groups (values, gradients, moments)
//! - `cloud` - the point cloud's parameter groups as one unit
//! - `sort` - per-frame depth sort (key generation + radix passes)
//! - `renderer` - forward compositing, loss, and gradient scatter passes
//! - `adam` - Adam update kernel over parameter groups
//! - `readback` - non-blocking loss readback pool

mod adam;
mod buffers;
mod cloud;
mod context;
mod params;
mod readback;
mod renderer;
mod sort;

pub use adam::{AdamConfig, GpuAdam};
pub use buffers::{create_buffer, create_buffer_init, read_buffer, read_buffer_blocking};
pub use cloud::GpuPointCloud;
pub use context::{GpuContext, GpuError};
pub use params::ParameterGroup;
pub use readback::LossReadback;
pub use renderer::{draw_count, PointRenderer, RenderSettings, RenderTarget};
pub use sort::{DepthSorter, SortBuffers};

use nalgebra::Matrix4;

/// nalgebra and WGSL both store matrices column-major, so the nested-array
/// conversion uploads directly.
pub(crate) fn matrix_to_gpu(m: &Matrix4<f32>) -> [[f32; 4]; 4] {
    (*m).into()
}

pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_to_gpu_is_column_major() {
        let m = Matrix4::new(
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0, //
            9.0, 10.0, 11.0, 12.0, //
            13.0, 14.0, 15.0, 16.0,
        );
        let gpu = matrix_to_gpu(&m);
        // Outer index is the column.
        assert_eq!(gpu[0], [1.0, 5.0, 9.0, 13.0]);
        assert_eq!(gpu[3], [4.0, 8.0, 12.0, 16.0]);
    }
}
