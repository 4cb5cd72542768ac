//! CollegeFootballData API client
//!
//! One authenticated blocking session per process. Each endpoint's nested
//! records are flattened into a `DataFrame` with the primary-table layout.

use super::store::FetchedBatch;
use crate::{ApiConfig, ApiSettings, CfbError, Outcome, Result, SPREAD_COLUMN};
use chrono::{DateTime, Datelike, Utc};
use polars::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

const FBS: &str = "fbs";
const CONSENSUS_PROVIDER: &str = "consensus";

/// A game as returned by `/games`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiGame {
    pub id: i64,
    pub season: i64,
    pub week: i64,
    #[serde(alias = "homeTeam")]
    pub home_team: String,
    #[serde(alias = "awayTeam")]
    pub away_team: String,
    #[serde(alias = "homePoints", default)]
    pub home_points: Option<f64>,
    #[serde(alias = "awayPoints", default)]
    pub away_points: Option<f64>,
    #[serde(alias = "homeDivision", alias = "homeClassification", default)]
    pub home_division: Option<String>,
    #[serde(alias = "awayDivision", alias = "awayClassification", default)]
    pub away_division: Option<String>,
    #[serde(alias = "homePregameElo", default)]
    pub home_pregame_elo: Option<f64>,
    #[serde(alias = "awayPregameElo", default)]
    pub away_pregame_elo: Option<f64>,
    #[serde(alias = "neutralSite", default)]
    pub neutral_site: Option<bool>,
}

impl ApiGame {
    /// Home points minus away points
    pub fn point_diff(&self) -> Option<f64> {
        Some(self.home_points? - self.away_points?)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        Outcome::from_points(self.home_points, self.away_points)
    }

    pub fn is_fbs(&self) -> bool {
        let fbs = |d: &Option<String>| d.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(FBS));
        fbs(&self.home_division) && fbs(&self.away_division)
    }

    /// Winning team, `tie`, or None while unplayed
    pub fn winner(&self) -> Option<String> {
        self.outcome()
            .map(|o| o.winner_label(&self.home_team, &self.away_team).to_string())
    }
}

/// A game's quotes as returned by `/lines`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiGameLines {
    pub id: i64,
    #[serde(default)]
    pub season: Option<Value>,
    #[serde(default)]
    pub week: Option<i64>,
    #[serde(alias = "homeTeam", default)]
    pub home_team: Option<String>,
    #[serde(alias = "awayTeam", default)]
    pub away_team: Option<String>,
    #[serde(default)]
    pub lines: Vec<ApiLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiLine {
    pub provider: String,
    #[serde(default)]
    pub spread: Option<Value>,
}

impl ApiGameLines {
    /// Consensus spread with the sign flipped: a 7-point home favourite
    /// (`-7`) becomes `7`, comparable with home minus away points.
    pub fn reversed_consensus_spread(&self) -> Option<f64> {
        self.lines
            .iter()
            .find(|l| l.provider.eq_ignore_ascii_case(CONSENSUS_PROVIDER))
            .and_then(|l| l.spread.as_ref())
            .and_then(value_f64)
            .map(|spread| -spread)
    }
}

/// One week of the season calendar
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarWeek {
    pub season: i64,
    pub week: i64,
    pub last_game_start: DateTime<Utc>,
}

/// Blocking, bearer-authenticated session against the provider
pub struct CfbdClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl CfbdClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| CfbError::Config(format!("Invalid API key: {}", e)))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::blocking::Client::builder()
            .user_agent("cfb-spread/0.1")
            .timeout(std::time::Duration::from_secs(60))
            .default_headers(headers)
            .build()?;

        Ok(CfbdClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(api: &ApiConfig, settings: &ApiSettings) -> Result<Self> {
        Self::new(&api.api_key, &settings.base_url)
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        log::debug!("GET {} {:?}", url, query);

        let response = self.client.get(&url).query(query).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CfbError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json()?)
    }

    fn year_week_query(year: i64, week: Option<i64>) -> Vec<(&'static str, String)> {
        let mut query = vec![("year", year.to_string())];
        if let Some(w) = week {
            query.push(("week", w.to_string()));
        }
        query
    }

    /// Basic game information, optionally restricted to FBS-vs-FBS games
    pub fn games(&self, year: i64, week: Option<i64>, only_fbs: bool) -> Result<DataFrame> {
        let games: Vec<ApiGame> = self.get_json("/games", &Self::year_week_query(year, week))?;
        log::info!("Fetched {} games for {} week {:?}", games.len(), year, week);
        games_frame(&games, only_fbs)
    }

    /// Advanced per-team game statistics, one row per team per game
    pub fn advanced_game_stats(&self, year: i64, week: Option<i64>) -> Result<DataFrame> {
        let records: Vec<Value> =
            self.get_json("/stats/game/advanced", &Self::year_week_query(year, week))?;
        log::info!("Fetched {} team-game stat rows for {} week {:?}", records.len(), year, week);
        stats_frame(&records, year)
    }

    /// Consensus spreads; games without a consensus quote are dropped
    pub fn betting_lines(&self, year: i64, week: Option<i64>) -> Result<DataFrame> {
        let lines: Vec<ApiGameLines> = self.get_json("/lines", &Self::year_week_query(year, week))?;
        log::info!("Fetched lines for {} games in {} week {:?}", lines.len(), year, week);
        lines_frame(&lines)
    }

    pub fn calendar(&self, year: i64) -> Result<Vec<CalendarWeek>> {
        let weeks: Vec<Value> = self.get_json("/calendar", &[("year", year.to_string())])?;
        Ok(calendar_weeks(&weeks))
    }

    /// Season and week of the next week still to finish
    pub fn current_week(&self, now: DateTime<Utc>) -> Result<(i64, i64)> {
        let year = i64::from(now.year());
        let calendar = self.calendar(year)?;
        current_week(&calendar, now).ok_or_else(|| {
            CfbError::Parse(format!("No remaining weeks in the {} calendar", year))
        })
    }

    /// Games, stats and lines for a season (all weeks when `week` is None)
    pub fn fetch(&self, year: i64, week: Option<i64>, only_fbs: bool) -> Result<FetchedBatch> {
        Ok(FetchedBatch {
            games: self.games(year, week, only_fbs)?,
            stats: self.advanced_game_stats(year, week)?,
            lines: self.betting_lines(year, week)?,
        })
    }
}

/// Flatten games into the `games_df.csv` layout
pub fn games_frame(games: &[ApiGame], only_fbs: bool) -> Result<DataFrame> {
    let kept: Vec<&ApiGame> = games.iter().filter(|g| !only_fbs || g.is_fbs()).collect();
    if only_fbs {
        log::debug!("Kept {} of {} games between FBS teams", kept.len(), games.len());
    }

    let frame = df!(
        "id" => kept.iter().map(|g| g.id).collect::<Vec<_>>(),
        "season" => kept.iter().map(|g| g.season).collect::<Vec<_>>(),
        "week" => kept.iter().map(|g| g.week).collect::<Vec<_>>(),
        "home_team" => kept.iter().map(|g| g.home_team.clone()).collect::<Vec<_>>(),
        "away_team" => kept.iter().map(|g| g.away_team.clone()).collect::<Vec<_>>(),
        "home_points" => kept.iter().map(|g| g.home_points).collect::<Vec<_>>(),
        "away_points" => kept.iter().map(|g| g.away_points).collect::<Vec<_>>(),
        "home_division" => kept.iter().map(|g| g.home_division.clone()).collect::<Vec<_>>(),
        "away_division" => kept.iter().map(|g| g.away_division.clone()).collect::<Vec<_>>(),
        "home_pregame_elo" => kept.iter().map(|g| g.home_pregame_elo).collect::<Vec<_>>(),
        "away_pregame_elo" => kept.iter().map(|g| g.away_pregame_elo).collect::<Vec<_>>(),
        "neutral_site" => kept.iter().map(|g| g.neutral_site).collect::<Vec<_>>(),
        "point_diff" => kept.iter().map(|g| g.point_diff()).collect::<Vec<_>>(),
        "winner" => kept.iter().map(|g| g.winner()).collect::<Vec<_>>(),
    )?;
    Ok(frame)
}

/// Flatten consensus spreads into the `betting_df.csv` layout
pub fn lines_frame(lines: &[ApiGameLines]) -> Result<DataFrame> {
    let quoted: Vec<(&ApiGameLines, f64)> = lines
        .iter()
        .filter_map(|g| g.reversed_consensus_spread().map(|s| (g, s)))
        .collect();
    let dropped = lines.len() - quoted.len();
    if dropped > 0 {
        log::debug!("Dropped {} games without a consensus spread", dropped);
    }

    let frame = df!(
        "id" => quoted.iter().map(|(g, _)| g.id).collect::<Vec<_>>(),
        "season" => quoted
            .iter()
            .map(|(g, _)| g.season.as_ref().and_then(value_f64).map(|s| s as i64))
            .collect::<Vec<_>>(),
        "week" => quoted.iter().map(|(g, _)| g.week).collect::<Vec<_>>(),
        "home_team" => quoted.iter().map(|(g, _)| g.home_team.clone()).collect::<Vec<_>>(),
        "away_team" => quoted.iter().map(|(g, _)| g.away_team.clone()).collect::<Vec<_>>(),
        SPREAD_COLUMN => quoted.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
    )?;
    Ok(frame)
}

/// Flatten advanced stats. Nested `offense` / `defense` objects become
/// `<path>_offense` / `<path>_defense` columns, `game_id` becomes `id`, and
/// `season` is set to the requested year.
pub fn stats_frame(records: &[Value], year: i64) -> Result<DataFrame> {
    let mut names: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut flat_records: Vec<Vec<(String, Value)>> = Vec::with_capacity(records.len());

    for record in records {
        let Some(object) = record.as_object() else {
            log::debug!("Skipping non-object stats record");
            continue;
        };

        let mut scalars = Vec::new();
        let mut offense = Vec::new();
        let mut defense = Vec::new();
        for (key, value) in object {
            match key.as_str() {
                "offense" => flatten_value("", value, &mut offense),
                "defense" => flatten_value("", value, &mut defense),
                _ => {
                    let name = match snake_case(key).as_str() {
                        "game_id" => crate::ID_COLUMN.to_string(),
                        other => other.to_string(),
                    };
                    if !value.is_object() && !value.is_array() {
                        scalars.push((name, value.clone()));
                    }
                }
            }
        }

        let mut flat = scalars;
        flat.extend(offense.into_iter().map(|(k, v)| (format!("{}_offense", k), v)));
        flat.extend(defense.into_iter().map(|(k, v)| (format!("{}_defense", k), v)));
        upsert_value(&mut flat, crate::SEASON_COLUMN, Value::from(year));

        for (name, _) in &flat {
            if seen.insert(name.clone()) {
                names.push(name.clone());
            }
        }
        flat_records.push(flat);
    }

    let columns: Vec<Column> = names
        .iter()
        .map(|name| {
            let values: Vec<Option<&Value>> = flat_records
                .iter()
                .map(|flat| flat.iter().find(|(n, _)| n == name).map(|(_, v)| v))
                .collect();
            Column::from(json_series(name, &values))
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// One typed column from JSON scalars: integers, floats or flags when every
/// present value agrees, text otherwise
fn json_series(name: &str, values: &[Option<&Value>]) -> Series {
    let present: Vec<&Value> = values.iter().flatten().copied().filter(|v| !v.is_null()).collect();
    let name: PlSmallStr = name.into();

    if present.is_empty() {
        return Series::full_null(name, values.len(), &DataType::Float64);
    }
    if present.iter().all(|v| v.is_i64()) {
        let ints: Vec<Option<i64>> = values.iter().map(|v| v.and_then(Value::as_i64)).collect();
        return Series::new(name, ints);
    }
    if present.iter().all(|v| v.is_number()) {
        let floats: Vec<Option<f64>> = values.iter().map(|v| v.and_then(Value::as_f64)).collect();
        return Series::new(name, floats);
    }
    if present.iter().all(|v| v.is_boolean()) {
        let flags: Vec<Option<bool>> = values.iter().map(|v| v.and_then(Value::as_bool)).collect();
        return Series::new(name, flags);
    }
    let text: Vec<Option<String>> = values
        .iter()
        .map(|v| match v {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
        .collect();
    Series::new(name, text)
}

/// Calendar weeks that carry a parseable season, week and last game start
pub fn calendar_weeks(records: &[Value]) -> Vec<CalendarWeek> {
    records
        .iter()
        .filter_map(|r| {
            let object = r.as_object()?;
            let season = field(object, &["season"]).and_then(value_f64)? as i64;
            let week = field(object, &["week"]).and_then(value_f64)? as i64;
            let last = field(object, &["last_game_start", "lastGameStart", "endDate"])?.as_str()?;
            let last_game_start = DateTime::parse_from_rfc3339(last).ok()?.with_timezone(&Utc);
            Some(CalendarWeek {
                season,
                week,
                last_game_start,
            })
        })
        .collect()
}

/// First calendar week whose last game has not started before `now`
pub fn current_week(calendar: &[CalendarWeek], now: DateTime<Utc>) -> Option<(i64, i64)> {
    let mut remaining: Vec<&CalendarWeek> =
        calendar.iter().filter(|w| now <= w.last_game_start).collect();
    remaining.sort_by_key(|w| w.last_game_start);
    remaining.first().map(|w| (w.season, w.week))
}

fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| object.get(*n))
}

/// Numbers, or strings holding numbers
fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Nested objects flatten to dotted snake_case paths
fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(object) => {
            for (key, nested) in object {
                let name = if prefix.is_empty() {
                    snake_case(key)
                } else {
                    format!("{}.{}", prefix, snake_case(key))
                };
                flatten_value(&name, nested, out);
            }
        }
        Value::Array(_) => {}
        scalar => {
            if !prefix.is_empty() {
                out.push((prefix.to_string(), scalar.clone()));
            }
        }
    }
}

fn upsert_value(values: &mut Vec<(String, Value)>, name: &str, value: Value) {
    match values.iter_mut().find(|(n, _)| n == name) {
        Some(entry) => entry.1 = value,
        None => values.push((name.to_string(), value)),
    }
}

/// `totalPPA` -> `total_ppa`, `successRate` -> `success_rate`
fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower)
            {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}
