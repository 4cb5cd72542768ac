//! Flat-file storage for the primary tables
//!
//! Games, team-game stats and betting lines live as CSV files under the data
//! directory. Updates are keyed on the game id.

use super::frame::{append_rows, read_csv, require_columns, write_csv};
use crate::{CfbError, Result, ID_COLUMN, SEASON_COLUMN};
use polars::prelude::*;
use std::path::{Path, PathBuf};

pub const TRAINING_FILE: &str = "training.csv";
pub const CURRENT_PREDICTIONS_FILE: &str = "current_predictions.csv";
pub const SUBMISSION_FILE: &str = "cfb_prediction_submission.csv";
pub const RUNNING_PREDICTIONS_FILE: &str = "running_predictions.csv";

/// The three primary tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Games,
    Stats,
    Lines,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Games, Table::Stats, Table::Lines];

    pub fn file_name(&self) -> &'static str {
        match self {
            Table::Games => "games_df.csv",
            Table::Stats => "stats_df.csv",
            Table::Lines => "betting_df.csv",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Table::Games => "games",
            Table::Stats => "stats",
            Table::Lines => "lines",
        };
        write!(f, "{}", name)
    }
}

/// Freshly fetched rows for each primary table
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub games: DataFrame,
    pub stats: DataFrame,
    pub lines: DataFrame,
}

impl FetchedBatch {
    pub fn table(&self, table: Table) -> &DataFrame {
        match table {
            Table::Games => &self.games,
            Table::Stats => &self.stats,
            Table::Lines => &self.lines,
        }
    }
}

/// How fetched rows whose game id is already stored are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Keep stored rows; only unseen game ids are appended
    #[default]
    AppendNew,
    /// Replace stored rows for every fetched game id
    Upsert,
}

/// Row counts from one table update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateSummary {
    pub appended: usize,
    pub replaced: usize,
    pub skipped: usize,
}

impl std::fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} appended, {} replaced, {} skipped",
            self.appended, self.replaced, self.skipped
        )
    }
}

/// Merge `fresh` into `existing` by the game id column.
///
/// Several fresh rows may share a game id (stats hold one row per team), so
/// the check is against ids already stored, not between fresh rows.
pub fn apply_update(existing: &DataFrame, fresh: &DataFrame, id_column: &str, mode: UpdateMode) -> Result<(DataFrame, UpdateSummary)> {
    if fresh.height() == 0 {
        return Ok((existing.clone(), UpdateSummary::default()));
    }
    require_columns(fresh, &[id_column])?;
    let existing = if existing.width() == 0 {
        fresh.clear()
    } else {
        existing.clone()
    };
    require_columns(&existing, &[id_column])?;

    let id = || col(id_column).cast(DataType::Int64);
    let anti = || JoinArgs::new(JoinType::Anti);
    let fresh_keyed = fresh
        .clone()
        .lazy()
        .with_column(id())
        .filter(col(id_column).is_not_null());
    let stored = existing.clone().lazy().with_column(id());
    let mut summary = UpdateSummary::default();

    let (kept, incoming) = match mode {
        UpdateMode::AppendNew => {
            let incoming = fresh_keyed
                .join(stored.select([col(id_column)]), [col(id_column)], [col(id_column)], anti())
                .collect()?;
            (existing, incoming)
        }
        UpdateMode::Upsert => {
            let incoming = fresh_keyed.collect()?;
            let kept = stored
                .join(incoming.clone().lazy().select([col(id_column)]), [col(id_column)], [col(id_column)], anti())
                .collect()?;
            summary.replaced = existing.height() - kept.height();
            (kept, incoming)
        }
    };

    summary.skipped = fresh.height() - incoming.height();
    summary.appended = incoming.height().saturating_sub(summary.replaced);
    let merged = append_rows(&kept, &incoming)?;
    Ok((merged, summary))
}

/// CSV tables under one data directory
#[derive(Debug, Clone)]
pub struct PrimaryStore {
    data_dir: PathBuf,
}

impl PrimaryStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        PrimaryStore {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub fn table_path(&self, table: Table) -> PathBuf {
        self.path(table.file_name())
    }

    pub fn exists(&self, table: Table) -> bool {
        self.table_path(table).is_file()
    }

    pub fn load(&self, table: Table) -> Result<DataFrame> {
        let path = self.table_path(table);
        if !path.is_file() {
            return Err(CfbError::MissingTable(path));
        }
        read_csv(&path)
    }

    pub fn save(&self, table: Table, frame: &DataFrame) -> Result<()> {
        write_csv(frame, self.table_path(table))
    }

    /// All three tables
    pub fn load_all(&self) -> Result<FetchedBatch> {
        Ok(FetchedBatch {
            games: self.load(Table::Games)?,
            stats: self.load(Table::Stats)?,
            lines: self.load(Table::Lines)?,
        })
    }

    /// Merge a fetched batch into the stored tables. Every table must already
    /// exist; nothing is written unless all three are present.
    pub fn update(&self, batch: &FetchedBatch, mode: UpdateMode) -> Result<Vec<(Table, UpdateSummary)>> {
        if let Some(missing) = Table::ALL.iter().find(|t| !self.exists(**t)) {
            return Err(CfbError::MissingTable(self.table_path(*missing)));
        }
        self.merge(batch, mode)
    }

    /// Like [`update`](Self::update), but tables that do not exist yet are
    /// created from the batch
    pub fn backfill(&self, batch: &FetchedBatch, mode: UpdateMode) -> Result<Vec<(Table, UpdateSummary)>> {
        self.merge(batch, mode)
    }

    fn merge(&self, batch: &FetchedBatch, mode: UpdateMode) -> Result<Vec<(Table, UpdateSummary)>> {
        let mut merged = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let fresh = batch.table(table);
            let existing = if self.exists(table) {
                self.load(table)?
            } else {
                log::info!("Creating {}", self.table_path(table).display());
                fresh.clear()
            };
            let (frame, summary) = apply_update(&existing, fresh, ID_COLUMN, mode)?;
            merged.push((table, frame, summary));
        }

        let mut summaries = Vec::with_capacity(merged.len());
        for (table, frame, summary) in merged {
            if frame.width() == 0 {
                log::warn!("Nothing fetched for {}; not writing it", table);
                summaries.push((table, summary));
                continue;
            }
            self.save(table, &frame)?;
            log::info!("Updated {}: {}", table, summary);
            summaries.push((table, summary));
        }
        Ok(summaries)
    }

    /// Row counts and season coverage of each stored table
    pub fn status(&self) -> Result<Vec<TableStatus>> {
        Table::ALL
            .iter()
            .map(|&table| {
                if !self.exists(table) {
                    return Ok(TableStatus {
                        table,
                        present: false,
                        rows: 0,
                        games: 0,
                        seasons: None,
                    });
                }
                let frame = self.load(table)?;
                let games = match frame.column(ID_COLUMN) {
                    Ok(ids) => ids.as_materialized_series().n_unique()?,
                    Err(_) => 0,
                };
                Ok(TableStatus {
                    table,
                    present: true,
                    rows: frame.height(),
                    games,
                    seasons: season_range(&frame),
                })
            })
            .collect()
    }
}

fn season_range(frame: &DataFrame) -> Option<(i64, i64)> {
    let seasons = frame.column(SEASON_COLUMN).ok()?.cast(&DataType::Int64).ok()?;
    let seasons = seasons.i64().ok()?;
    Some((seasons.min()?, seasons.max()?))
}

/// Stored table summary
#[derive(Debug, Clone, PartialEq)]
pub struct TableStatus {
    pub table: Table,
    pub present: bool,
    pub rows: usize,
    pub games: usize,
    pub seasons: Option<(i64, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::float_values;

    fn stats(rows: &[(i64, &str, f64)]) -> DataFrame {
        df!(
            "id" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            "season" => vec![2023i64; rows.len()],
            "team" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            "ppa" => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn batch(games: &[i64]) -> FetchedBatch {
        let n = games.len();
        let g = df!(
            "id" => games.to_vec(),
            "season" => vec![2023i64; n],
            "home_team" => vec!["Alpha"; n],
            "away_team" => vec!["Beta"; n],
        )
        .unwrap();
        let l = df!(
            "id" => games.to_vec(),
            "season" => vec![2023i64; n],
            crate::SPREAD_COLUMN => vec![3.5; n],
        )
        .unwrap();
        let s: Vec<(i64, &str, f64)> = games
            .iter()
            .flat_map(|&id| [(id, "Alpha", 1.0), (id, "Beta", 2.0)])
            .collect();
        FetchedBatch {
            games: g,
            stats: stats(&s),
            lines: l,
        }
    }

    #[test]
    fn test_append_new_ignores_stored_ids() {
        let existing = stats(&[(1, "Alpha", 1.0), (1, "Beta", 2.0)]);
        let fresh = stats(&[(1, "Alpha", 9.0), (1, "Beta", 9.0), (2, "Alpha", 3.0), (2, "Beta", 4.0)]);

        let (merged, summary) = apply_update(&existing, &fresh, "id", UpdateMode::AppendNew).unwrap();
        assert_eq!(merged.height(), 4);
        assert_eq!(float_values(&merged, "ppa").unwrap(), vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(summary.appended, 2);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn test_append_is_idempotent() {
        let fresh = stats(&[(1, "Alpha", 1.0), (1, "Beta", 2.0)]);
        let (once, _) = apply_update(&fresh.clear(), &fresh, "id", UpdateMode::AppendNew).unwrap();
        let (twice, summary) = apply_update(&once, &fresh, "id", UpdateMode::AppendNew).unwrap();
        assert!(once.equals_missing(&twice));
        assert_eq!(summary.appended, 0);
    }

    #[test]
    fn test_fresh_rows_without_id_are_skipped() {
        let fresh = df!(
            "id" => &[Some(1i64), None],
            "team" => &["Alpha", "Beta"],
        )
        .unwrap();
        let (merged, summary) = apply_update(&DataFrame::default(), &fresh, "id", UpdateMode::AppendNew).unwrap();
        assert_eq!(merged.height(), 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_upsert_replaces_rows() {
        let existing = stats(&[(1, "Alpha", 1.0), (1, "Beta", 2.0), (2, "Alpha", 3.0)]);
        let fresh = stats(&[(1, "Alpha", 9.0), (1, "Beta", 8.0)]);

        let (merged, summary) = apply_update(&existing, &fresh, "id", UpdateMode::Upsert).unwrap();
        assert_eq!(merged.height(), 3);
        assert_eq!(float_values(&merged, "id").unwrap()[0], Some(2.0));
        assert_eq!(float_values(&merged, "ppa").unwrap()[1], Some(9.0));
        assert_eq!(summary.replaced, 2);
        assert_eq!(summary.appended, 0);
    }

    #[test]
    fn test_update_requires_existing_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = PrimaryStore::new(dir.path());
        let err = store.update(&batch(&[1]), UpdateMode::AppendNew).unwrap_err();
        assert!(matches!(err, CfbError::MissingTable(_)));
        assert!(!store.exists(Table::Games));
    }

    #[test]
    fn test_backfill_then_update_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PrimaryStore::new(dir.path());

        store.backfill(&batch(&[1, 2]), UpdateMode::AppendNew).unwrap();
        let summaries = store.update(&batch(&[2, 3]), UpdateMode::AppendNew).unwrap();

        let games = store.load(Table::Games).unwrap();
        assert_eq!(games.height(), 3);
        assert_eq!(store.load(Table::Stats).unwrap().height(), 6);
        assert_eq!(summaries[0], (Table::Games, UpdateSummary { appended: 1, replaced: 0, skipped: 1 }));

        let status = store.status().unwrap();
        assert!(status.iter().all(|s| s.present));
        assert_eq!(status[1].rows, 6);
        assert_eq!(status[1].games, 3);
        assert_eq!(status[0].seasons, Some((2023, 2023)));
    }

    #[test]
    fn test_status_of_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let status = PrimaryStore::new(dir.path()).status().unwrap();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| !s.present && s.rows == 0));
    }
}
