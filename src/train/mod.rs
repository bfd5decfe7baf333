//! Training orchestration.

mod trainer;

pub use trainer::{TrainConfig, Trainer};
