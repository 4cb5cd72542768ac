//! Regression model
//!
//! Linear spread regressor with its normalisation sidecar, behind the
//! [`Regressor`] trait the prediction driver scores with.

pub mod regressor;

pub use regressor::{ModelMeta, Normalization, Regressor, SpreadRegressor};
