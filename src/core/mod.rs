//! Core data structures and math.
//!
//! Everything in this module is pure host-side data: the point cloud, the
//! camera model, and the key encoding shared with the GPU sorter. No I/O, no
//! device resources.

mod camera;
mod cloud;
pub mod math;

pub use camera::Camera;
pub use cloud::PointCloud;
