//! Data models for cities, raw map documents and persisted station records.
//!
//! This module defines the core data structures used throughout the application:
//! - [`CityRef`]: One entry of the AMap city directory
//! - [`RawLineDoc`], [`RawLine`], [`RawStation`]: The per-city subway JSON as served
//! - [`StationRecord`]: One persisted `(city, line, name)` fact
//! - [`TaskState`] and [`StationBatch`]: Progress of a single city task
//!
//! The raw types keep AMap's terse field names (`l`, `ln`, `la`, `st`, `n`)
//! behind serde renames.

use serde::Deserialize;
use std::fmt;

/// A city as listed on the AMap subway index page.
///
/// # Fields
///
/// * `id` - Opaque AMap identifier (e.g. `"1100"`)
/// * `key` - Transliterated city key used in the data URL (e.g. `"beijing"`)
/// * `display_name` - Human-readable city name (e.g. `"北京"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityRef {
    pub id: String,
    pub key: String,
    pub display_name: String,
}

/// The subway document for one city.
///
/// Only the line list is read; lines are kept as raw JSON so that one
/// malformed line does not discard the lines parsed before it.
#[derive(Debug, Deserialize)]
pub struct RawLineDoc {
    #[serde(rename = "l", default)]
    pub lines: Vec<serde_json::Value>,
}

/// A single line entry of a [`RawLineDoc`].
#[derive(Debug, Deserialize)]
pub struct RawLine {
    /// Line name, e.g. `"1号线"`. Only required once a station is emitted.
    #[serde(rename = "ln", default)]
    pub name: Option<String>,
    /// Sub-branch label, e.g. `"A"`. Empty strings count as absent.
    #[serde(rename = "la", default)]
    pub branch: Option<String>,
    /// Stations in document order.
    #[serde(rename = "st", default)]
    pub stations: Vec<serde_json::Value>,
}

impl RawLine {
    /// Line name with the sub-branch label appended in parentheses.
    ///
    /// `None` when the entry carries no `ln`.
    ///
    /// ```ignore
    /// // ln = "1号线", la = "A"  ->  "1号线(A)"
    /// // ln = "1号线", la absent ->  "1号线"
    /// ```
    pub fn effective_name(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        Some(match self.branch.as_deref() {
            Some(label) if !label.is_empty() => format!("{name}({label})"),
            _ => name.to_string(),
        })
    }
}

/// A single station entry under a [`RawLine`].
#[derive(Debug, Deserialize)]
pub struct RawStation {
    #[serde(rename = "n")]
    pub name: String,
}

/// One persisted `(city, line, station)` fact.
///
/// Maps onto the `info(city, line, name)` table and onto one
/// `city,line,name` row of the flat file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::FromRow)]
pub struct StationRecord {
    pub city: String,
    pub line: String,
    #[sqlx(rename = "name")]
    pub station_name: String,
}

impl StationRecord {
    pub fn new(city: impl Into<String>, line: impl Into<String>, station_name: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            line: line.into(),
            station_name: station_name.into(),
        }
    }

    /// The flat-file row for this record, without trailing newline.
    ///
    /// Fields are joined with a bare comma and never escaped, so a name that
    /// itself contains a comma shifts the field boundary for readers of the
    /// flat file.
    pub fn to_flat_row(&self) -> String {
        format!("{},{},{}", self.city, self.line, self.station_name)
    }
}

/// Lifecycle of one city task.
///
/// `Pending -> Fetching -> {Parsing -> Persisting -> Done | Abandoned}`;
/// `Done` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Fetching,
    Parsing,
    Persisting,
    Done,
    Abandoned,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Abandoned)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Fetching => "fetching",
            TaskState::Parsing => "parsing",
            TaskState::Persisting => "persisting",
            TaskState::Done => "done",
            TaskState::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Result of fetching one city's document.
///
/// `records` may be non-empty even when `state` is [`TaskState::Abandoned`]:
/// records parsed before a malformed entry are kept.
#[derive(Debug)]
pub struct StationBatch {
    pub records: Vec<StationRecord>,
    pub state: TaskState,
}

impl StationBatch {
    pub fn abandoned(records: Vec<StationRecord>) -> Self {
        Self {
            records,
            state: TaskState::Abandoned,
        }
    }

    pub fn done(records: Vec<StationRecord>) -> Self {
        Self {
            records,
            state: TaskState::Done,
        }
    }
}
