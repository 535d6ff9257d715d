//! Read-only lookups over the crawled `info` table.
//!
//! Two lookups are offered: all stations of a `city` + `line`, and every
//! line serving a station `name`. Results print one row per line as
//! `city  line  name`.

use crate::cli::Lookup;
use crate::models::StationRecord;
use crate::outputs::sqlite::{find_by_city_line, find_by_station};
use sqlx::SqliteConnection;
use std::error::Error;
use tracing::{info, instrument};

/// Printed when a lookup matches nothing.
pub const NO_MATCH: &str = "no matching records";

/// Dispatch a parsed lookup command to the matching search.
pub async fn run_lookup(conn: &mut SqliteConnection, query: &Lookup) -> Result<Vec<String>, Box<dyn Error>> {
    match query {
        Lookup::Line { city, line } => search_line(conn, city, line).await,
        Lookup::Station { name } => search_station(conn, name).await,
    }
}

/// Stations of `line` in `city`. Inputs are trimmed; both must be non-empty.
#[instrument(level = "info", skip(conn))]
pub async fn search_line(
    conn: &mut SqliteConnection,
    city: &str,
    line: &str,
) -> Result<Vec<String>, Box<dyn Error>> {
    let (city, line) = (city.trim(), line.trim());
    if city.is_empty() || line.is_empty() {
        return Err("expected both a city and a line, e.g. `line 北京 1号线`".into());
    }
    let rows = find_by_city_line(conn, city, line).await?;
    info!(count = rows.len(), "Line lookup finished");
    Ok(render(&rows))
}

/// Every city and line serving station `name`. The name is trimmed and must be non-empty.
#[instrument(level = "info", skip(conn))]
pub async fn search_station(conn: &mut SqliteConnection, name: &str) -> Result<Vec<String>, Box<dyn Error>> {
    let name = name.trim();
    if name.is_empty() {
        return Err("station name must not be empty".into());
    }
    let rows = find_by_station(conn, name).await?;
    info!(count = rows.len(), "Station lookup finished");
    Ok(render(&rows))
}

fn render(rows: &[StationRecord]) -> Vec<String> {
    if rows.is_empty() {
        return vec![NO_MATCH.to_string()];
    }
    rows.iter()
        .map(|r| format!("{}  {}  {}", r.city, r.line, r.station_name))
        .collect()
}
