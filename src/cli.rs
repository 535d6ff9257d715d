//! Command-line interface definitions for amap_subway.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Storage locations can be provided via command-line flags or environment variables.

use crate::scrapers::{DEFAULT_DATA_URL, DEFAULT_LISTING_URL};
use clap::{Args, Parser, Subcommand};

/// Command-line arguments for the amap_subway application.
///
/// # Examples
///
/// ```sh
/// # Crawl every city into ./data
/// amap_subway crawl
///
/// # Crawl with at most 8 cities in flight
/// amap_subway crawl --max-workers 8
///
/// # Look up a line, or a station across all cities
/// amap_subway line 北京 1号线
/// amap_subway station 西直门
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// SQLite database holding the `info` table
    #[arg(short, long, global = true, env = "SUBWAY_DB_PATH", default_value = "data/city_lines.db")]
    pub db_path: String,

    /// Append-only `city,line,name` mirror of the table
    #[arg(short, long, global = true, env = "SUBWAY_CSV_PATH", default_value = "data/subway.csv")]
    pub csv_path: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch every city's subway map and append its stations to storage
    Crawl(CrawlArgs),

    #[command(flatten)]
    Lookup(Lookup),
}

/// Read-only lookups against the `info` table.
#[derive(Subcommand, Debug)]
pub enum Lookup {
    /// List the stations of one line in one city
    Line {
        /// City display name, e.g. 北京
        city: String,
        /// Line name including any branch label, e.g. 1号线 or 房山线(支线)
        line: String,
    },

    /// List every city and line serving a station
    Station {
        /// Station name, e.g. 西直门
        name: String,
    },
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// AMap subway index page listing the cities
    #[arg(long, env = "SUBWAY_LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    pub listing_url: String,

    /// AMap per-city subway data endpoint
    #[arg(long, env = "SUBWAY_DATA_URL", default_value = DEFAULT_DATA_URL)]
    pub data_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Maximum number of cities fetched at once (default: all at once)
    #[arg(long)]
    pub max_workers: Option<usize>,
}
