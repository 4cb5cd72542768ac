//! Model training
//!
//! Training table construction, the fitting loop, and regression metrics.

pub mod dataset;
pub mod metrics;
pub mod trainer;

pub use dataset::{build_training_set, FeatureMatrix, RESIDUAL_TARGET};
pub use metrics::{Metrics, TrainingHistory};
pub use trainer::{train_model, SpreadTrainer, TrainBackend, TrainedModel};
