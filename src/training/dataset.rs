//! Training table and feature matrices
//!
//! `training.csv` is the historical game table joined with each side's
//! pre-game rolling stats, the consensus spread, and the residual target.

use polars::prelude::*;
use std::collections::BTreeMap;

use crate::data::frame::{float_values, rename_columns, require_columns, write_csv};
use crate::data::store::{FetchedBatch, PrimaryStore, TRAINING_FILE};
use crate::features::{join_features, JoinMode, RollingConfig, RollingFeatureEngine};
use crate::{CfbError, Result, POINT_DIFF_COLUMN, SEASON_COLUMN, SPREAD_COLUMN};

/// Margin relative to the line: `point_diff - consensus_spread(reversed)`
pub const RESIDUAL_TARGET: &str = "spread_residual";

/// Build the training table from the primary tables
pub fn training_frame(tables: &FetchedBatch, rolling: &RollingConfig) -> Result<DataFrame> {
    let engine = RollingFeatureEngine::new(rolling.clone());
    let rolled = engine.historical(&tables.stats)?;
    let joined = join_features(&tables.games, &rolled, &tables.lines, JoinMode::Training)?;
    require_columns(&joined, &[POINT_DIFF_COLUMN, SPREAD_COLUMN])?;

    let residual = (col(POINT_DIFF_COLUMN).cast(DataType::Float64) - col(SPREAD_COLUMN).cast(DataType::Float64))
        .alias(RESIDUAL_TARGET);
    Ok(joined.lazy().with_column(residual).collect()?)
}

/// Read the primary tables, build the training table and write `training.csv`
pub fn build_training_set(store: &PrimaryStore, rolling: &RollingConfig) -> Result<DataFrame> {
    let tables = store.load_all()?;
    log::info!(
        "Building training set from {} games, {} team-game stat rows, {} lines",
        tables.games.height(),
        tables.stats.height(),
        tables.lines.height()
    );

    let frame = training_frame(&tables, rolling)?;
    let path = store.path(TRAINING_FILE);
    write_csv(&frame, &path)?;
    log::info!("Wrote {} rows to {}", frame.height(), path.display());
    Ok(frame)
}

/// Rename columns from their joined names to model feature names
pub fn apply_mapping(frame: &DataFrame, mapping: &BTreeMap<String, String>) -> Result<DataFrame> {
    rename_columns(frame, mapping)
}

/// Rows before `test_season_start` train, the rest test. Rows without a
/// season are in neither.
pub fn split_by_season(frame: &DataFrame, test_season_start: i64) -> Result<(DataFrame, DataFrame)> {
    require_columns(frame, &[SEASON_COLUMN])?;
    let season = || col(SEASON_COLUMN).cast(DataType::Int64);
    let train = frame
        .clone()
        .lazy()
        .filter(season().lt(lit(test_season_start)))
        .collect()?;
    let test = frame
        .clone()
        .lazy()
        .filter(season().gt_eq(lit(test_season_start)))
        .collect()?;
    Ok((train, test))
}

/// Dense numeric rows for the model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub features: Vec<String>,
    pub rows: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
}

impl FeatureMatrix {
    /// Select `features` (and `target`, if given) from `frame`. Rows with any
    /// missing or non-numeric value among them are dropped.
    pub fn from_frame<S: AsRef<str>>(frame: &DataFrame, features: &[S], target: Option<&str>) -> Result<Self> {
        require_columns(frame, features)?;
        let columns = features
            .iter()
            .map(|f| float_values(frame, f.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let target_values = target.map(|t| float_values(frame, t)).transpose()?;

        let mut matrix = FeatureMatrix {
            features: features.iter().map(|f| f.as_ref().to_string()).collect(),
            ..Default::default()
        };
        for i in 0..frame.height() {
            let values: Option<Vec<f32>> = columns.iter().map(|c| c[i].map(|v| v as f32)).collect();
            let Some(values) = values else { continue };

            if let Some(ys) = &target_values {
                let Some(y) = ys[i] else { continue };
                matrix.targets.push(y as f32);
            }
            matrix.rows.push(values);
        }

        let dropped = frame.height() - matrix.len();
        if dropped > 0 {
            log::debug!("Dropped {} of {} rows with missing values", dropped, frame.height());
        }
        Ok(matrix)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.features.len()
    }
}

/// Train and test matrices from `training.csv` contents
pub fn train_test_matrices(
    frame: &DataFrame,
    features: &[String],
    target: &str,
    test_season_start: i64,
) -> Result<(FeatureMatrix, FeatureMatrix)> {
    let (train, test) = split_by_season(frame, test_season_start)?;
    let train = FeatureMatrix::from_frame(&train, features, Some(target))?;
    let test = FeatureMatrix::from_frame(&test, features, Some(target))?;
    if train.is_empty() {
        return Err(CfbError::Model(format!(
            "no complete training rows before season {}",
            test_season_start
        )));
    }
    log::info!("Train rows: {}, test rows: {}", train.len(), test.len());
    Ok((train, test))
}
