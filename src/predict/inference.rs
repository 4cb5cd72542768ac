//! Weekly predictions
//!
//! Scores the current week's games with a saved model and persists the
//! scored frame, the submission file, and the running prediction history.

use burn::backend::NdArray;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::path::{Path, PathBuf};

use crate::data::client::CfbdClient;
use crate::data::frame::{append_rows, has_column, read_csv, require_columns, write_csv, write_csv_indexed_by};
use crate::data::store::{
    PrimaryStore, Table, CURRENT_PREDICTIONS_FILE, RUNNING_PREDICTIONS_FILE, SUBMISSION_FILE,
};
use crate::features::{join_features, JoinMode, RollingConfig, RollingFeatureEngine};
use crate::model::{Regressor, SpreadRegressor};
use crate::training::dataset::{apply_mapping, FeatureMatrix};
use crate::{
    CfbError, FeatureConfig, Result, AWAY_TEAM_COLUMN, HOME_TEAM_COLUMN, ID_COLUMN, SPREAD_COLUMN,
};

pub const PREDICTED_DIFF_COLUMN: &str = "predicted_diff";
pub const SPREAD_PREDICTION_COLUMN: &str = "spread_prediction";
/// Market spread in the usual sign convention (home favourite negative)
pub const MARKET_SPREAD_COLUMN: &str = "spread";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const MODEL_COLUMN: &str = "model";

/// Games joined with each side's latest rolling stats and the spread
pub fn inference_frame(
    games: &DataFrame,
    stats: &DataFrame,
    lines: &DataFrame,
    rolling: &RollingConfig,
) -> Result<DataFrame> {
    let latest = RollingFeatureEngine::new(rolling.clone()).latest(stats)?;
    join_features(games, &latest, lines, JoinMode::Inference)
}

/// Scores joined game rows with a regressor
pub struct Predictor<'a> {
    regressor: &'a dyn Regressor,
    features: &'a FeatureConfig,
}

impl<'a> Predictor<'a> {
    /// The model's feature list must match the configured one, in order
    pub fn new(regressor: &'a dyn Regressor, features: &'a FeatureConfig) -> Result<Self> {
        if regressor.features() != features.features.as_slice() {
            return Err(CfbError::Config(format!(
                "model '{}' was trained on [{}] but the feature config lists [{}]",
                regressor.name(),
                regressor.features().join(", "),
                features.features.join(", ")
            )));
        }
        Ok(Predictor { regressor, features })
    }

    /// Add `predicted_diff`, `spread_prediction` and `spread` to every row that
    /// has all model features and a consensus spread; other rows are dropped.
    pub fn score(&self, joined: &DataFrame) -> Result<DataFrame> {
        let mut mapped = apply_mapping(joined, &self.features.mapping)?;

        let absent: Vec<&String> = self
            .regressor
            .features()
            .iter()
            .filter(|f| !has_column(&mapped, f))
            .collect();
        if !absent.is_empty() {
            log::warn!(
                "Feature columns not in the joined table: {}",
                absent.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            );
            for name in absent {
                let nulls = Series::full_null(name.as_str().into(), mapped.height(), &DataType::Float64);
                mapped.with_column(nulls)?;
            }
        }
        require_columns(&mapped, &[SPREAD_COLUMN])?;

        let spread = || col(SPREAD_COLUMN).cast(DataType::Float64);
        let complete = self
            .regressor
            .features()
            .iter()
            .fold(spread().is_not_null(), |acc, f| {
                acc.and(col(f.as_str()).cast(DataType::Float64).is_not_null())
            });
        let mut scored = mapped.clone().lazy().filter(complete).collect()?;
        if scored.height() < mapped.height() {
            log::info!(
                "Scoring {} of {} games; the rest lack features or a consensus spread",
                scored.height(),
                mapped.height()
            );
        }

        let matrix = FeatureMatrix::from_frame(&scored, self.regressor.features(), None)?;
        let diffs: Vec<f64> = self
            .regressor
            .predict(&matrix.rows)?
            .into_iter()
            .map(f64::from)
            .collect();
        scored.with_column(Series::new(PREDICTED_DIFF_COLUMN.into(), diffs))?;

        Ok(scored
            .lazy()
            .with_columns([
                ((spread() + col(PREDICTED_DIFF_COLUMN)) * lit(-1.0)).alias(SPREAD_PREDICTION_COLUMN),
                (spread() * lit(-1.0)).alias(MARKET_SPREAD_COLUMN),
            ])
            .collect()?)
    }
}

/// `id`, `home`, `away`, `prediction` from a scored frame
pub fn submission_frame(scored: &DataFrame) -> Result<DataFrame> {
    require_columns(
        scored,
        &[ID_COLUMN, HOME_TEAM_COLUMN, AWAY_TEAM_COLUMN, SPREAD_PREDICTION_COLUMN],
    )?;
    Ok(scored
        .clone()
        .lazy()
        .select([
            col(ID_COLUMN),
            col(HOME_TEAM_COLUMN).alias("home"),
            col(AWAY_TEAM_COLUMN).alias("away"),
            col(SPREAD_PREDICTION_COLUMN).alias("prediction"),
        ])
        .collect()?)
}

/// Paths written by [`persist_predictions`]
#[derive(Debug, Clone)]
pub struct PredictionFiles {
    pub current: PathBuf,
    pub submission: PathBuf,
    pub running: PathBuf,
}

/// Write the current and submission files and append to the running history
pub fn persist_predictions(
    store: &PrimaryStore,
    scored: &DataFrame,
    model_name: &str,
    now: DateTime<Utc>,
) -> Result<PredictionFiles> {
    let files = PredictionFiles {
        current: store.path(CURRENT_PREDICTIONS_FILE),
        submission: store.path(SUBMISSION_FILE),
        running: store.path(RUNNING_PREDICTIONS_FILE),
    };

    write_csv(scored, &files.current)?;
    write_csv_indexed_by(&submission_frame(scored)?, &files.submission, ID_COLUMN)?;

    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let stamped = scored
        .clone()
        .lazy()
        .with_columns([
            lit(timestamp).alias(TIMESTAMP_COLUMN),
            lit(model_name.to_string()).alias(MODEL_COLUMN),
        ])
        .collect()?;

    let running = if files.running.is_file() {
        append_rows(&read_csv(&files.running)?, &stamped)?
    } else {
        stamped
    };
    write_csv(&running, &files.running)?;

    log::info!(
        "Saved {} predictions; history now {} rows",
        scored.height(),
        running.height()
    );
    Ok(files)
}

/// Score one week's games and persist the results
pub fn predict_week(
    store: &PrimaryStore,
    games: &DataFrame,
    lines: &DataFrame,
    rolling: &RollingConfig,
    predictor: &Predictor<'_>,
    now: DateTime<Utc>,
) -> Result<(DataFrame, PredictionFiles)> {
    let stats = store.load(Table::Stats)?;
    let joined = inference_frame(games, &stats, lines, rolling)?;
    let scored = predictor.score(&joined)?;
    let files = persist_predictions(store, &scored, predictor.regressor.name(), now)?;
    Ok((scored, files))
}

/// Full inference run: resolve the week, fetch its games and lines, score
/// with the named model, and persist
#[allow(clippy::too_many_arguments)]
pub fn run_inference(
    client: &CfbdClient,
    store: &PrimaryStore,
    model_dir: &Path,
    model_name: &str,
    features: &FeatureConfig,
    rolling: &RollingConfig,
    week: Option<(i64, i64)>,
    now: DateTime<Utc>,
) -> Result<(DataFrame, PredictionFiles)> {
    let (season, week) = match week {
        Some(w) => w,
        None => client.current_week(now)?,
    };
    log::info!("Predicting season {} week {}", season, week);

    let device = Default::default();
    let regressor = SpreadRegressor::<NdArray<f32>>::load(&device, model_dir, model_name)?;

    let games = client.games(season, Some(week), true)?;
    let lines = client.betting_lines(season, Some(week))?;
    let predictor = Predictor::new(&regressor, features)?;
    predict_week(store, &games, &lines, rolling, &predictor, now)
}
