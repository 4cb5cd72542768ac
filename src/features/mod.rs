//! Feature engineering
//!
//! Rolling team form and the game-level join that feeds the model.

pub mod columns;
pub mod join;
pub mod rolling;

pub use columns::Side;
pub use join::{join_features, FeatureJoiner, JoinMode};
pub use rolling::{RollingConfig, RollingFeatureEngine, RollingMode};
