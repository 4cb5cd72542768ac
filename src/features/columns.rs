//! Home/away alignment helpers
//!
//! Shared by the rolling and join engines: side suffixes, column collision
//! checks and key de-duplication.

use crate::data::frame::{column_names, require_columns};
use crate::{CfbError, Result, AWAY_TEAM_COLUMN, HOME_TEAM_COLUMN};
use polars::prelude::*;

/// Which team of a game a set of features describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Home, Side::Away];

    pub fn suffix(&self) -> &'static str {
        match self {
            Side::Home => "_home",
            Side::Away => "_away",
        }
    }

    /// Game-table column naming this side's team
    pub fn team_column(&self) -> &'static str {
        match self {
            Side::Home => HOME_TEAM_COLUMN,
            Side::Away => AWAY_TEAM_COLUMN,
        }
    }

    /// `<name><suffix>`
    pub fn suffixed(&self, name: &str) -> String {
        format!("{}{}", name, self.suffix())
    }
}

/// Fail if any of `incoming` is already among `existing`
pub fn ensure_disjoint(existing: &[String], incoming: &[String]) -> Result<()> {
    let clashes: Vec<&str> = incoming
        .iter()
        .filter(|c| existing.contains(c))
        .map(String::as_str)
        .collect();
    if clashes.is_empty() {
        Ok(())
    } else {
        Err(CfbError::Schema(format!(
            "column name collision: {}",
            clashes.join(", ")
        )))
    }
}

/// One row per distinct `keys`, keeping the first occurrence in input order.
/// Rows with a null key are dropped.
pub fn first_per_key(frame: &DataFrame, keys: &[&str]) -> Result<DataFrame> {
    require_columns(frame, keys)?;

    let complete = keys
        .iter()
        .fold(lit(true), |acc, k| acc.and(col(*k).is_not_null()));
    let keyed = frame.clone().lazy().filter(complete).collect()?;

    let values: Vec<Expr> = column_names(frame)
        .into_iter()
        .filter(|c| !keys.contains(&c.as_str()))
        .map(|c| col(c.as_str()).first())
        .collect();
    let by: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let unique = keyed.clone().lazy().group_by_stable(by).agg(values).collect()?;

    let duplicates = keyed.height() - unique.height();
    if duplicates > 0 {
        log::warn!(
            "{} duplicate keys on ({}); keeping first occurrence",
            duplicates,
            keys.join(", ")
        );
    }
    Ok(unique)
}
