//! College football spread prediction
//!
//! Pulls games, advanced team statistics and betting lines from the
//! CollegeFootballData API, turns per-game team statistics into rolling
//! team form, joins it onto games and lines, and trains/serves a regression
//! model that predicts how far the final margin lands from the market spread.

pub mod data;
pub mod features;
pub mod model;
pub mod predict;
pub mod training;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Game identifier column shared by every primary table
pub const ID_COLUMN: &str = "id";
/// Team name column of the statistics table
pub const TEAM_COLUMN: &str = "team";
pub const SEASON_COLUMN: &str = "season";
pub const WEEK_COLUMN: &str = "week";
pub const HOME_TEAM_COLUMN: &str = "home_team";
pub const AWAY_TEAM_COLUMN: &str = "away_team";
pub const POINT_DIFF_COLUMN: &str = "point_diff";
/// Market spread flipped so it reads like `home_points - away_points`
pub const SPREAD_COLUMN: &str = "consensus_spread(reversed)";

/// Result of a finished game from the home side's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    HomeWin,
    AwayWin,
    Tie,
}

impl Outcome {
    /// Outcome of a game, or None while either score is unknown
    pub fn from_points(home_points: Option<f64>, away_points: Option<f64>) -> Option<Self> {
        let (home, away) = (home_points?, away_points?);
        match home.partial_cmp(&away)? {
            std::cmp::Ordering::Greater => Some(Outcome::HomeWin),
            std::cmp::Ordering::Less => Some(Outcome::AwayWin),
            std::cmp::Ordering::Equal => Some(Outcome::Tie),
        }
    }

    /// Value stored in the `winner` column
    pub fn winner_label<'a>(&self, home_team: &'a str, away_team: &'a str) -> &'a str {
        match self {
            Outcome::HomeWin => home_team,
            Outcome::AwayWin => away_team,
            Outcome::Tie => Outcome::TIE_LABEL,
        }
    }

    pub const TIE_LABEL: &'static str = "tie";
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::HomeWin => write!(f, "home win"),
            Outcome::AwayWin => write!(f, "away win"),
            Outcome::Tie => write!(f, "tie"),
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum CfbError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status} for {endpoint}")]
    Api { endpoint: String, status: u16 },

    #[error("Table error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Primary table missing: {} - run `cfb data backfill` first", .0.display())]
    MissingTable(PathBuf),

    #[error("No trained model named {0} - run `cfb train` first")]
    NoModel(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, CfbError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub api: ApiSettings,
    pub features: FeatureSettings,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the primary tables and generated CSVs
    pub data_dir: String,
    /// Directory holding named model artifacts
    pub model_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    /// YAML file with the `API_KEY` entry
    pub api_config_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSettings {
    /// Trailing window length in games
    pub rolling_period: usize,
    /// YAML file with `FEATURES` / `TARGET` / `MAPPING`
    pub features_config_path: String,
    /// Statistic columns that are bookkeeping, never averaged
    pub non_feature_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// First season held out for testing; earlier seasons train
    pub test_season_start: i64,
    /// Epochs without a better loss before stopping; 0 trains every epoch
    #[serde(default)]
    pub early_stopping_patience: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                data_dir: "data".to_string(),
                model_dir: "model".to_string(),
            },
            api: ApiSettings {
                base_url: "https://api.collegefootballdata.com".to_string(),
                api_config_path: "configs/api_configs.yml".to_string(),
            },
            features: FeatureSettings {
                rolling_period: 7,
                features_config_path: "configs/features.yml".to_string(),
                non_feature_columns: vec![
                    SEASON_COLUMN.to_string(),
                    WEEK_COLUMN.to_string(),
                    "conference".to_string(),
                    "opponent".to_string(),
                    "opponent_conference".to_string(),
                ],
            },
            training: TrainingConfig {
                epochs: 500,
                learning_rate: 0.05,
                test_season_start: 2023,
                early_stopping_patience: 50,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CfbError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| CfbError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CfbError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn data_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.data.data_dir).join(file_name)
    }
}

/// Provider credentials (`configs/api_configs.yml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(rename = "API_KEY")]
    pub api_key: String,
}

impl ApiConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_yaml(path.as_ref())
    }
}

/// Model input selection (`configs/features.yml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Ordered model input columns
    #[serde(rename = "FEATURES")]
    pub features: Vec<String>,
    /// Regression target column
    #[serde(rename = "TARGET")]
    pub target: String,
    /// Joined column name -> feature name, applied before selection
    #[serde(rename = "MAPPING", default)]
    pub mapping: BTreeMap<String, String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        let mut features = Vec::new();
        for side in ["home", "away"] {
            for stat in ["ppa", "success_rate", "explosiveness"] {
                for unit in ["offense", "defense"] {
                    features.push(format!("{}_{}_{}", stat, unit, side));
                }
            }
        }
        features.extend([
            "home_pregame_elo".to_string(),
            "away_pregame_elo".to_string(),
            SPREAD_COLUMN.to_string(),
        ]);

        FeatureConfig {
            features,
            target: "spread_residual".to_string(),
            mapping: BTreeMap::new(),
        }
    }
}

impl FeatureConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: FeatureConfig = load_yaml(path.as_ref())?;
        if config.features.is_empty() {
            return Err(CfbError::Config(format!(
                "{} lists no FEATURES",
                path.as_ref().display()
            )));
        }
        Ok(config)
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CfbError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(serde_yaml::from_str(&content)?)
}
