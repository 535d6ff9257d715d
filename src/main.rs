//! # amap_subway
//!
//! Scrapes subway line and station data for every Chinese city on the AMap
//! subway map, appends it to a SQLite table and a flat text file, and answers
//! simple lookups against the result.
//!
//! ## Usage
//!
//! ```sh
//! amap_subway crawl
//! amap_subway line 北京 1号线
//! amap_subway station 西直门
//! ```
//!
//! ## Architecture
//!
//! A crawl follows a pipeline:
//! 1. **Indexing**: Read the city directory from the AMap index page
//! 2. **Fetching**: One concurrent task per city downloads its line/station JSON,
//!    retrying transient failures with jittered backoff
//! 3. **Persisting**: Each parsed record is committed to the `info` table and
//!    appended to the flat file, under one lock per backend

use clap::Parser;
use std::error::Error;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod coordinator;
mod models;
mod outputs;
mod query;
mod scrapers;
mod utils;

use api::{HttpFetcher, RetryFetch, RetryPolicy};
use cli::{Cli, Command, CrawlArgs, Lookup};
use models::CityRef;
use outputs::Sink;
use outputs::flat_file::FlatFile;
use outputs::sqlite::{SqliteTable, open_read_only};
use scrapers::Endpoints;
use scrapers::cities::fetch_cities;
use utils::ensure_parent_writable;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let res = match args.command {
        Command::Crawl(ref crawl) => crawl_all(&args.db_path, &args.csv_path, crawl).await,
        Command::Lookup(ref request) => lookup(&args.db_path, request).await,
    };

    if let Err(e) = &res {
        error!(error = %e, "amap_subway failed");
    }
    res
}

/// Crawl every listed city into the table and the flat file.
#[instrument(level = "info", skip(crawl))]
async fn crawl_all(db_path: &str, csv_path: &str, crawl: &CrawlArgs) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();
    info!("crawl starting up");

    let endpoints = Endpoints::new(&crawl.listing_url, &crawl.data_url)?;

    // Early check: both outputs must be writable before any request goes out
    ensure_parent_writable(db_path).await?;
    ensure_parent_writable(csv_path).await?;
    let table = SqliteTable::open(db_path).await?;
    let flat = FlatFile::open(csv_path).await?;
    info!(db = %db_path, csv = %flat.path(), "Storage ready");
    let sink = Sink::new(table, flat);

    let http = HttpFetcher::new(StdDuration::from_secs(crawl.timeout_secs))?;

    // ---- Index cities ----
    let (popular, other) = fetch_cities(&http, endpoints.listing_url.as_str()).await;
    let cities: Vec<CityRef> = popular.into_iter().chain(other).collect();
    if cities.is_empty() {
        warn!("No cities found; nothing to crawl");
    }

    // ---- Fetch and persist ----
    let retrying = RetryFetch::new(http, RetryPolicy::default());
    debug!(?retrying, "Retry policy");
    let summary = coordinator::run_all(&retrying, &endpoints, &sink, &cities, crawl.max_workers).await;

    let (table, _flat) = sink.into_parts();
    table.close().await?;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        cities = summary.cities,
        done = summary.done,
        abandoned = summary.abandoned,
        persisted = summary.persisted,
        "Execution complete"
    );
    Ok(())
}

/// Run one read-only lookup and print its rows.
#[instrument(level = "info", skip(request))]
async fn lookup(db_path: &str, request: &Lookup) -> Result<(), Box<dyn Error>> {
    let mut conn = open_read_only(db_path).await?;
    for row in query::run_lookup(&mut conn, request).await? {
        println!("{row}");
    }
    Ok(())
}
