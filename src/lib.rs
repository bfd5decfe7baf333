//! # splatfit: GPU point-splat scene fitting
//!
//! Fits a 3D point cloud (positions and RGBA colors) to a set of posed
//! reference photographs by gradient descent. Every iteration renders the
//! cloud from a random training view with depth-sorted alpha compositing,
//! measures the squared pixel error against the photo, scatters gradients
//! back to the points, and applies an Adam update. All of it runs as wgpu
//! compute; the host only orchestrates and reads the loss back
//! asynchronously.
//!
//! ## Architecture
//!
//! - `core`: cameras, point clouds, depth-key math
//! - `scene`: scene file loading (cameras JSON + reference images)
//! - `gpu`: device pipelines (sort, render, backward, Adam, readback)
//! - `render`: CPU reference renderer and sRGB boundary conversions
//! - `train`: the training loop

pub mod core;
pub mod gpu;
pub mod render;
pub mod scene;
pub mod train;

// Re-export commonly used types at crate root for convenience
pub use crate::core::{Camera, PointCloud};
pub use crate::scene::{load_scene, LoadError, SplatScene};
pub use crate::train::{TrainConfig, Trainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
