//! Prediction and inference
//!
//! Load a trained model, score the current week, and persist predictions.

pub mod inference;

pub use inference::{persist_predictions, run_inference, PredictionFiles, Predictor};
