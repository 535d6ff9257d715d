//! The `info(city, line, name)` table.
//!
//! The table has no key or index and is only ever appended to by the
//! crawler. Readers look rows up by exact `city` + `line`, or by station
//! `name`.

use super::RecordWriter;
use crate::models::StationRecord;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::error::Error;
use std::str::FromStr;
use tracing::{debug, info, instrument};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS info(city TEXT, line TEXT, name TEXT)";
const INSERT_RECORD: &str = "INSERT INTO info(city, line, name) VALUES (?, ?, ?)";

/// A single connection to the station database, used for appends.
#[derive(Debug)]
pub struct SqliteTable {
    conn: SqliteConnection,
}

impl SqliteTable {
    /// Open (or create) the database at `url` and make sure `info` exists.
    ///
    /// `url` is either a file path or a `sqlite:` URL such as `sqlite::memory:`.
    #[instrument(level = "info")]
    pub async fn open(url: &str) -> Result<Self, Box<dyn Error>> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&opts).await?;
        sqlx::query(CREATE_TABLE).execute(&mut conn).await?;
        info!("Opened station database");
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub async fn close(self) -> Result<(), Box<dyn Error>> {
        self.conn.close().await?;
        Ok(())
    }
}

impl RecordWriter for SqliteTable {
    async fn write_record(&mut self, record: &StationRecord) -> Result<(), Box<dyn Error>> {
        let mut tx = self.conn.begin().await?;
        sqlx::query(INSERT_RECORD)
            .bind(&record.city)
            .bind(&record.line)
            .bind(&record.station_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Open an existing database for lookups only.
#[instrument(level = "debug")]
pub async fn open_read_only(url: &str) -> Result<SqliteConnection, Box<dyn Error>> {
    let opts = SqliteConnectOptions::from_str(url)?.read_only(true);
    Ok(SqliteConnection::connect_with(&opts).await?)
}

/// All stations of `line` in `city`, in insertion order.
#[instrument(level = "debug", skip(conn))]
pub async fn find_by_city_line(
    conn: &mut SqliteConnection,
    city: &str,
    line: &str,
) -> Result<Vec<StationRecord>, Box<dyn Error>> {
    let rows = sqlx::query_as::<_, StationRecord>(
        "SELECT city, line, name FROM info WHERE city = ? AND line = ? ORDER BY rowid",
    )
    .bind(city)
    .bind(line)
    .fetch_all(conn)
    .await?;
    debug!(count = rows.len(), "Looked up line");
    Ok(rows)
}

/// Every line, in every city, that serves a station called `name`.
#[instrument(level = "debug", skip(conn))]
pub async fn find_by_station(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Vec<StationRecord>, Box<dyn Error>> {
    let rows = sqlx::query_as::<_, StationRecord>(
        "SELECT city, line, name FROM info WHERE name = ? ORDER BY rowid",
    )
    .bind(name)
    .fetch_all(conn)
    .await?;
    debug!(count = rows.len(), "Looked up station");
    Ok(rows)
}
