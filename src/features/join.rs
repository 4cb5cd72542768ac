//! Game-level feature matrix
//!
//! Attaches each side's rolling team features to the game table and the
//! consensus spread after them. Every join is a left join on the game table:
//! the output has exactly one row per input game, and anything not found is
//! left null for the caller to drop before scoring.

use super::columns::{ensure_disjoint, first_per_key, Side};
use crate::data::frame::{column_names, require_columns};
use crate::{Result, ID_COLUMN, SPREAD_COLUMN, TEAM_COLUMN};
use polars::prelude::*;

/// Input order of the game table, restored after the joins
const ROW_ORDER: &str = "__game_row";

/// How rolling rows are matched to games
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Rolling rows carry their own game id; match on (game id, team)
    Training,
    /// One latest row per team; match on team only
    Inference,
}

/// Column names the join reads
#[derive(Debug, Clone)]
pub struct JoinKeys {
    pub game_column: String,
    pub team_column: String,
    pub spread_column: String,
}

impl Default for JoinKeys {
    fn default() -> Self {
        JoinKeys {
            game_column: ID_COLUMN.to_string(),
            team_column: TEAM_COLUMN.to_string(),
            spread_column: SPREAD_COLUMN.to_string(),
        }
    }
}

/// Builds the one-row-per-game feature table
#[derive(Debug, Clone, Default)]
pub struct FeatureJoiner {
    keys: JoinKeys,
}

impl FeatureJoiner {
    pub fn new(keys: JoinKeys) -> Self {
        FeatureJoiner { keys }
    }

    /// Join rolling features for both sides and the consensus spread onto `games`
    pub fn join(&self, games: &DataFrame, rolling: &DataFrame, lines: &DataFrame, mode: JoinMode) -> Result<DataFrame> {
        let game = self.keys.game_column.as_str();
        let mut required = vec![game];
        required.extend(Side::BOTH.iter().map(|s| s.team_column()));
        require_columns(games, &required)?;

        let mut columns = column_names(games);
        let mut joined = games
            .clone()
            .lazy()
            .with_row_index(ROW_ORDER, None)
            .with_columns([
                col(game).cast(DataType::Int64),
                col(Side::Home.team_column()).cast(DataType::String),
                col(Side::Away.team_column()).cast(DataType::String),
            ]);

        for side in Side::BOTH {
            let (right, added) = self.side_features(rolling, side, mode)?;
            ensure_disjoint(&columns, &added)?;
            columns.extend(added);
            let on = self.game_keys(side, mode);
            joined = joined.join(right, on.clone(), on, JoinArgs::new(JoinType::Left));
        }

        let spread = self.keys.spread_column.as_str();
        require_columns(lines, &[game, spread])?;
        ensure_disjoint(&columns, &[spread.to_string()])?;
        let quotes = first_per_key(&lines.select([game, spread])?, &[game])?
            .lazy()
            .select([col(game).cast(DataType::Int64), col(spread).cast(DataType::Float64)]);
        joined = joined.join(quotes, [col(game)], [col(game)], JoinArgs::new(JoinType::Left));

        let out = joined
            .sort([ROW_ORDER], SortMultipleOptions::default())
            .collect()?
            .drop(ROW_ORDER)?;

        log::info!("Joined {} games ({:?}): {} columns", out.height(), mode, out.width());
        Ok(out)
    }

    /// Rolling keys as they appear in the rolling table
    fn rolling_keys(&self, mode: JoinMode) -> Vec<&str> {
        match mode {
            JoinMode::Training => vec![self.keys.game_column.as_str(), self.keys.team_column.as_str()],
            JoinMode::Inference => vec![self.keys.team_column.as_str()],
        }
    }

    /// The same keys on the game table for one side
    fn game_keys(&self, side: Side, mode: JoinMode) -> Vec<Expr> {
        match mode {
            JoinMode::Training => vec![col(self.keys.game_column.as_str()), col(side.team_column())],
            JoinMode::Inference => vec![col(side.team_column())],
        }
    }

    /// One row per key with the team renamed to the side's game column and
    /// every feature suffixed; also returns the suffixed names
    fn side_features(&self, rolling: &DataFrame, side: Side, mode: JoinMode) -> Result<(LazyFrame, Vec<String>)> {
        let keys = self.rolling_keys(mode);
        let unique = first_per_key(rolling, &keys)?;

        let features: Vec<String> = column_names(&unique)
            .into_iter()
            .filter(|c| !keys.contains(&c.as_str()))
            .collect();
        let added: Vec<String> = features.iter().map(|f| side.suffixed(f)).collect();

        let mut exprs = vec![col(self.keys.team_column.as_str())
            .cast(DataType::String)
            .alias(side.team_column())];
        if mode == JoinMode::Training {
            exprs.push(col(self.keys.game_column.as_str()).cast(DataType::Int64));
        }
        exprs.extend(
            features
                .iter()
                .zip(&added)
                .map(|(f, name)| col(f.as_str()).alias(name.as_str())),
        );

        let matched = unique.height();
        log::debug!("{} {:?} rolling rows to match", matched, side);
        Ok((unique.lazy().select(exprs), added))
    }
}

/// Join with the default column names
pub fn join_features(games: &DataFrame, rolling: &DataFrame, lines: &DataFrame, mode: JoinMode) -> Result<DataFrame> {
    FeatureJoiner::default().join(games, rolling, lines, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::float_values;
    use crate::CfbError;

    fn games() -> DataFrame {
        df!(
            "id" => &[1i64, 2],
            "season" => &[2023i64, 2023],
            "week" => &[5i64, 6],
            "home_team" => &["Alpha", "Beta"],
            "away_team" => &["Beta", "Alpha"],
            "point_diff" => &[10.0, -3.0],
        )
        .unwrap()
    }

    fn historical_rolling() -> DataFrame {
        df!(
            "team" => &["Alpha", "Beta", "Alpha", "Beta"],
            "id" => &[1i64, 1, 2, 2],
            "ppa" => &[10.0, 5.0, 15.0, 7.0],
        )
        .unwrap()
    }

    fn lines() -> DataFrame {
        df!(
            "id" => &[1i64],
            SPREAD_COLUMN => &[7.0],
        )
        .unwrap()
    }

    #[test]
    fn test_training_join_matches_game_and_team() {
        let out = join_features(&games(), &historical_rolling(), &lines(), JoinMode::Training).unwrap();

        assert_eq!(out.height(), 2);
        assert_eq!(float_values(&out, "ppa_home").unwrap(), vec![Some(10.0), Some(7.0)]);
        // game 2: Beta hosts Alpha
        assert_eq!(float_values(&out, "ppa_away").unwrap(), vec![Some(5.0), Some(15.0)]);
    }

    #[test]
    fn test_columns_are_suffixed_without_collisions() {
        let out = join_features(&games(), &historical_rolling(), &lines(), JoinMode::Training).unwrap();
        assert_eq!(
            column_names(&out),
            vec![
                "id",
                "season",
                "week",
                "home_team",
                "away_team",
                "point_diff",
                "ppa_home",
                "ppa_away",
                "consensus_spread(reversed)",
            ]
        );
    }

    #[test]
    fn test_missing_line_keeps_row() {
        let out = join_features(&games(), &historical_rolling(), &lines(), JoinMode::Training).unwrap();
        assert_eq!(float_values(&out, SPREAD_COLUMN).unwrap(), vec![Some(7.0), None]);
    }

    #[test]
    fn test_inference_join_by_team_only() {
        let latest = df!("team" => &["Alpha", "Beta"], "ppa" => &[12.0, 6.0]).unwrap();

        let out = join_features(&games(), &latest, &lines(), JoinMode::Inference).unwrap();
        assert_eq!(float_values(&out, "ppa_home").unwrap(), vec![Some(12.0), Some(6.0)]);
        assert_eq!(float_values(&out, "ppa_away").unwrap(), vec![Some(6.0), Some(12.0)]);
    }

    #[test]
    fn test_unmatched_team_is_missing_not_dropped() {
        let latest = df!("team" => &["Alpha"], "ppa" => &[12.0]).unwrap();

        let out = join_features(&games(), &latest, &lines(), JoinMode::Inference).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(float_values(&out, "ppa_away").unwrap()[0], None);
    }

    #[test]
    fn test_game_order_is_kept() {
        let games = games().reverse();
        let out = join_features(&games, &historical_rolling(), &lines(), JoinMode::Training).unwrap();
        assert_eq!(float_values(&out, "id").unwrap(), vec![Some(2.0), Some(1.0)]);
        assert_eq!(float_values(&out, SPREAD_COLUMN).unwrap(), vec![None, Some(7.0)]);
    }

    #[test]
    fn test_training_requires_game_id_on_rolling_side() {
        let rolling = historical_rolling().drop("id").unwrap();
        let err = join_features(&games(), &rolling, &lines(), JoinMode::Training).unwrap_err();
        assert!(matches!(err, CfbError::Schema(_)));
    }

    #[test]
    fn test_feature_name_collision_is_schema_error() {
        let mut games = games();
        games
            .with_column(Series::new("ppa_home".into(), &[0.0, 0.0]))
            .unwrap();
        let err = join_features(&games, &historical_rolling(), &lines(), JoinMode::Training).unwrap_err();
        assert!(matches!(err, CfbError::Schema(_)));
    }

    #[test]
    fn test_duplicate_rolling_rows_do_not_duplicate_games() {
        let extra = df!("team" => &["Alpha"], "id" => &[1i64], "ppa" => &[99.0]).unwrap();
        let rolling = historical_rolling().vstack(&extra).unwrap();
        let out = join_features(&games(), &rolling, &lines(), JoinMode::Training).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(float_values(&out, "ppa_home").unwrap()[0], Some(10.0));
    }
}
