//! CPU reference renderer and color-space boundary conversions.
//!
//! The device pipeline is the fast path; this module exists so its output
//! and gradients can be validated on the host, and to prepare reference
//! images for upload.

pub mod convert;
mod grad;
mod raster;

pub use convert::{
    downsample_to_linear_rgba, image_to_linear_rgba, linear_rgba_to_image, linear_to_srgb_u8,
    srgb_u8_to_linear_f32,
};
pub use grad::{render_with_gradients_cpu, CpuGradients};
pub use raster::{render_cpu, sort_order};
