//! Rolling team form
//!
//! Turns the per-team, per-game statistics table into trailing averages.
//! Historical mode gives every (team, game) row the mean of that team's
//! previous `period` games, so a game's own numbers never feed its features.
//! Latest mode keeps one row per team with the mean of its last `period`
//! games, the form a team carries into a game it has not played yet.

use crate::data::frame::{is_numeric, require_columns};
use crate::{CfbError, FeatureSettings, Result, ID_COLUMN, SEASON_COLUMN, TEAM_COLUMN, WEEK_COLUMN};
use polars::prelude::*;
use std::collections::HashSet;

/// Which rows the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingMode {
    /// One row per (team, game), averaged over strictly earlier games
    Historical,
    /// One row per team, averaged over its most recent games inclusive
    Latest,
}

/// Rolling window configuration
#[derive(Debug, Clone)]
pub struct RollingConfig {
    /// Number of games in the trailing window
    pub period: usize,
    pub team_column: String,
    /// Game identifier, carried through in historical mode
    pub game_column: String,
    pub season_column: String,
    pub week_column: String,
    /// Columns that are never averaged and never emitted
    pub non_feature_columns: Vec<String>,
}

impl Default for RollingConfig {
    fn default() -> Self {
        RollingConfig {
            period: 7,
            team_column: TEAM_COLUMN.to_string(),
            game_column: ID_COLUMN.to_string(),
            season_column: SEASON_COLUMN.to_string(),
            week_column: WEEK_COLUMN.to_string(),
            non_feature_columns: vec![SEASON_COLUMN.to_string(), WEEK_COLUMN.to_string()],
        }
    }
}

impl RollingConfig {
    pub fn from_settings(settings: &FeatureSettings) -> Self {
        RollingConfig {
            period: settings.rolling_period,
            non_feature_columns: settings.non_feature_columns.clone(),
            ..Self::default()
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period;
        self
    }
}

/// Computes trailing per-team statistic averages
pub struct RollingFeatureEngine {
    config: RollingConfig,
}

impl RollingFeatureEngine {
    pub fn new(config: RollingConfig) -> Self {
        RollingFeatureEngine { config }
    }

    /// Per-game features for training: `[team, game, metrics...]`
    pub fn historical(&self, stats: &DataFrame) -> Result<DataFrame> {
        self.compute(stats, RollingMode::Historical)
    }

    /// Current form for inference: `[team, metrics...]`
    pub fn latest(&self, stats: &DataFrame) -> Result<DataFrame> {
        self.compute(stats, RollingMode::Latest)
    }

    pub fn compute(&self, stats: &DataFrame, mode: RollingMode) -> Result<DataFrame> {
        let c = &self.config;
        if c.period == 0 {
            return Err(CfbError::Config("rolling period must be at least 1".to_string()));
        }

        let mut required = vec![c.team_column.as_str(), c.season_column.as_str(), c.week_column.as_str()];
        if mode == RollingMode::Historical {
            required.push(c.game_column.as_str());
        }
        require_columns(stats, &required)?;
        self.check_order_columns(stats)?;
        let metrics = self.metric_columns(stats);

        let options = RollingOptionsFixedWindow {
            window_size: c.period,
            min_periods: 1,
            ..Default::default()
        };
        let team = || [col(c.team_column.as_str())];
        let sorted = stats
            .clone()
            .lazy()
            .with_columns([
                col(c.season_column.as_str()).cast(DataType::Float64),
                col(c.week_column.as_str()).cast(DataType::Float64),
            ])
            .sort(
                [c.team_column.as_str(), c.season_column.as_str(), c.week_column.as_str()],
                SortMultipleOptions::default().with_maintain_order(true),
            );

        let out = match mode {
            RollingMode::Historical => {
                let mut exprs = vec![col(c.team_column.as_str()), col(c.game_column.as_str())];
                // shifted first: strictly earlier games only
                exprs.extend(metrics.iter().map(|m| {
                    col(m.as_str())
                        .cast(DataType::Float64)
                        .shift(lit(1))
                        .rolling_mean(options.clone())
                        .over(team())
                        .alias(m.as_str())
                }));
                sorted.select(exprs).collect()?
            }
            RollingMode::Latest => {
                let rolled: Vec<Expr> = metrics
                    .iter()
                    .map(|m| {
                        col(m.as_str())
                            .cast(DataType::Float64)
                            .rolling_mean(options.clone())
                            .over(team())
                            .alias(m.as_str())
                    })
                    .collect();
                let last: Vec<Expr> = metrics.iter().map(|m| col(m.as_str()).last()).collect();
                sorted
                    .with_columns(rolled)
                    .group_by_stable(team())
                    .agg(last)
                    .collect()?
            }
        };

        log::debug!(
            "Rolling ({:?}, period {}): {} input rows -> {} rows, {} metrics",
            mode,
            c.period,
            stats.height(),
            out.height(),
            metrics.len()
        );
        Ok(out)
    }

    /// Team, season and week must be present on every row, and season and
    /// week must be numeric
    fn check_order_columns(&self, stats: &DataFrame) -> Result<()> {
        let c = &self.config;
        let teams = stats.column(c.team_column.as_str())?.null_count();
        if teams > 0 {
            return Err(CfbError::Schema(format!("{} rows have no {}", teams, c.team_column)));
        }
        for name in [c.season_column.as_str(), c.week_column.as_str()] {
            let bad = stats.column(name)?.cast(&DataType::Float64)?.null_count();
            if bad > 0 {
                return Err(CfbError::Schema(format!("{} rows have no numeric {}", bad, name)));
            }
        }
        Ok(())
    }

    /// Numeric statistic columns; keys, ordering and non-feature columns
    /// are excluded. A statistic holding any text is left out with a warning.
    fn metric_columns(&self, stats: &DataFrame) -> Vec<String> {
        let c = &self.config;
        let mut excluded: HashSet<&str> = c.non_feature_columns.iter().map(String::as_str).collect();
        excluded.insert(c.team_column.as_str());
        excluded.insert(c.game_column.as_str());
        excluded.insert(c.season_column.as_str());
        excluded.insert(c.week_column.as_str());

        stats
            .get_columns()
            .iter()
            .filter(|column| !excluded.contains(column.name().as_str()))
            .filter_map(|column| {
                if is_numeric(column.dtype()) {
                    Some(column.name().to_string())
                } else {
                    log::warn!(
                        "Statistic column '{}' is {} rather than numeric; leaving it out of the rolling features",
                        column.name(),
                        column.dtype()
                    );
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::{column_names, float_values, has_column, text_values};

    /// `(team, game id, season, week, ppa)` rows
    fn stats(rows: &[(&str, i64, i64, i64, Option<f64>)]) -> DataFrame {
        df!(
            "id" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            "season" => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
            "week" => rows.iter().map(|r| r.3).collect::<Vec<_>>(),
            "team" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            "conference" => vec!["SEC"; rows.len()],
            "ppa" => rows.iter().map(|r| r.4).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn engine(period: usize) -> RollingFeatureEngine {
        let mut config = RollingConfig::default().with_period(period);
        config.non_feature_columns.push("conference".to_string());
        RollingFeatureEngine::new(config)
    }

    fn ppa_for(frame: &DataFrame, team: &str, id: i64) -> Option<f64> {
        let teams = text_values(frame, "team").unwrap();
        let ids = float_values(frame, "id").unwrap();
        let row = (0..frame.height())
            .find(|&i| teams[i].as_deref() == Some(team) && ids[i] == Some(id as f64))
            .unwrap();
        float_values(frame, "ppa").unwrap()[row]
    }

    #[test]
    fn test_average_excludes_current_game() {
        let input = stats(&[
            ("Alpha", 1, 2023, 1, Some(10.0)),
            ("Alpha", 2, 2023, 2, Some(20.0)),
            ("Alpha", 3, 2023, 3, Some(30.0)),
            ("Alpha", 4, 2023, 4, Some(99.0)),
        ]);
        let out = engine(7).historical(&input).unwrap();

        assert_eq!(column_names(&out), vec!["team", "id", "ppa"]);
        assert_eq!(ppa_for(&out, "Alpha", 1), None);
        assert_eq!(ppa_for(&out, "Alpha", 2), Some(10.0));
        assert_eq!(ppa_for(&out, "Alpha", 3), Some(15.0));
        assert_eq!(ppa_for(&out, "Alpha", 4), Some(20.0));
    }

    #[test]
    fn test_future_games_do_not_leak() {
        let base = [
            ("Alpha", 1, 2023, 1, Some(10.0)),
            ("Alpha", 2, 2023, 2, Some(20.0)),
            ("Alpha", 3, 2023, 3, Some(30.0)),
        ];
        let mut changed = base;
        changed[1].4 = Some(-500.0);
        changed[2].4 = Some(800.0);

        let a = engine(7).historical(&stats(&base)).unwrap();
        let b = engine(7).historical(&stats(&changed)).unwrap();
        // game 2 only sees game 1
        assert_eq!(ppa_for(&a, "Alpha", 2), ppa_for(&b, "Alpha", 2));
    }

    #[test]
    fn test_window_is_bounded_by_period() {
        let input = stats(&[
            ("Alpha", 1, 2023, 1, Some(10.0)),
            ("Alpha", 2, 2023, 2, Some(20.0)),
            ("Alpha", 3, 2023, 3, Some(30.0)),
            ("Alpha", 4, 2023, 4, Some(40.0)),
        ]);
        let out = engine(2).historical(&input).unwrap();
        assert_eq!(ppa_for(&out, "Alpha", 4), Some(25.0));
    }

    #[test]
    fn test_rows_are_sorted_before_windowing() {
        let input = stats(&[
            ("Alpha", 4, 2023, 4, Some(40.0)),
            ("Beta", 9, 2022, 12, Some(1.0)),
            ("Alpha", 2, 2023, 2, Some(20.0)),
            ("Alpha", 9, 2022, 12, Some(0.0)),
            ("Alpha", 3, 2023, 3, Some(30.0)),
        ]);
        let out = engine(2).historical(&input).unwrap();
        // 2022 week 12 precedes 2023 week 2
        assert_eq!(ppa_for(&out, "Alpha", 9), None);
        assert_eq!(ppa_for(&out, "Alpha", 2), Some(0.0));
        assert_eq!(ppa_for(&out, "Alpha", 4), Some(25.0));
        assert_eq!(ppa_for(&out, "Beta", 9), None);
    }

    #[test]
    fn test_missing_values_are_skipped_not_zeroed() {
        let input = stats(&[
            ("Alpha", 1, 2023, 1, Some(10.0)),
            ("Alpha", 2, 2023, 2, None),
            ("Alpha", 3, 2023, 3, Some(30.0)),
            ("Alpha", 4, 2023, 4, Some(0.0)),
        ]);
        let out = engine(7).historical(&input).unwrap();
        assert_eq!(ppa_for(&out, "Alpha", 4), Some(20.0));
    }

    #[test]
    fn test_latest_keeps_one_row_per_team() {
        let input = stats(&[
            ("Alpha", 1, 2023, 1, Some(10.0)),
            ("Beta", 1, 2023, 1, Some(3.0)),
            ("Alpha", 2, 2023, 2, Some(20.0)),
            ("Alpha", 3, 2023, 3, Some(30.0)),
            ("Beta", 5, 2023, 5, Some(5.0)),
        ]);
        let out = engine(2).latest(&input).unwrap();

        assert_eq!(column_names(&out), vec!["team", "ppa"]);
        assert_eq!(out.height(), 2);
        assert_eq!(text_values(&out, "team").unwrap()[0].as_deref(), Some("Alpha"));
        // inclusive of the most recent game
        assert_eq!(float_values(&out, "ppa").unwrap(), vec![Some(25.0), Some(4.0)]);
    }

    #[test]
    fn test_latest_is_dated_to_most_recent_game_not_last_row() {
        let input = stats(&[
            ("Alpha", 30, 2023, 3, Some(30.0)),
            ("Alpha", 90, 2022, 9, Some(-90.0)),
            ("Alpha", 10, 2023, 1, Some(10.0)),
            ("Alpha", 20, 2023, 2, Some(20.0)),
        ]);
        let out = engine(2).latest(&input).unwrap();

        // 2023 weeks 2 and 3; the 2022 row read last must not count
        assert_eq!(out.height(), 1);
        assert_eq!(float_values(&out, "ppa").unwrap(), vec![Some(25.0)]);
    }

    #[test]
    fn test_bookkeeping_columns_dropped() {
        let input = stats(&[("Alpha", 1, 2023, 1, Some(10.0))]);
        let out = engine(7).historical(&input).unwrap();
        assert!(!has_column(&out, "season"));
        assert!(!has_column(&out, "week"));
        assert!(!has_column(&out, "conference"));
    }

    #[test]
    fn test_text_statistic_is_left_out() {
        let mut input = stats(&[("Alpha", 1, 2023, 1, Some(10.0)), ("Alpha", 2, 2023, 2, Some(20.0))]);
        input
            .with_column(Series::new("havoc".into(), &["0.12", "-"]))
            .unwrap();
        let out = engine(7).historical(&input).unwrap();

        assert!(!has_column(&out, "havoc"));
        assert_eq!(ppa_for(&out, "Alpha", 2), Some(10.0));
    }

    #[test]
    fn test_missing_order_column_is_schema_error() {
        let input = stats(&[("Alpha", 1, 2023, 1, Some(10.0))]).drop("week").unwrap();
        let err = engine(7).historical(&input).unwrap_err();
        assert!(matches!(err, CfbError::Schema(_)));
    }

    #[test]
    fn test_null_week_is_schema_error() {
        let mut input = stats(&[("Alpha", 1, 2023, 1, Some(10.0)), ("Alpha", 2, 2023, 2, Some(20.0))]);
        input
            .with_column(Series::new("week".into(), &[Some(1i64), None]))
            .unwrap();
        let err = engine(7).latest(&input).unwrap_err();
        assert!(matches!(err, CfbError::Schema(_)));
    }

    #[test]
    fn test_latest_does_not_need_game_column() {
        let input = stats(&[("Alpha", 1, 2023, 1, Some(10.0))]).drop("id").unwrap();
        let out = engine(7).latest(&input).unwrap();
        assert_eq!(out.height(), 1);
        assert!(engine(7).historical(&input).is_err());
    }

    #[test]
    fn test_zero_period_is_config_error() {
        let input = stats(&[("Alpha", 1, 2023, 1, Some(10.0))]);
        assert!(matches!(engine(0).latest(&input), Err(CfbError::Config(_))));
    }
}
