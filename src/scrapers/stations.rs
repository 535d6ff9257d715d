//! AMap per-city subway document scraper.
//!
//! Each city's map is served as one JSON document:
//!
//! ```text
//! {"s": "北京", "l": [{"ln": "1号线", "la": "", "st": [{"n": "苹果园", ...}, ...]}, ...]}
//! ```
//!
//! Lines with a sub-branch label (`la`) are recorded as `ln(la)`.

use crate::api::PageFetch;
use crate::models::{CityRef, RawLine, RawLineDoc, RawStation, StationBatch, StationRecord, TaskState};
use crate::scrapers::Endpoints;
use crate::utils::{looks_truncated, random_user_agent, throttle_interval, truncate_for_log};
use std::error::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

/// Fetch and flatten one city's subway document.
///
/// `fetcher` is expected to carry its own retry policy. When it gives up the
/// city is abandoned with no records. A document that fails to parse part way
/// keeps the records read before the failure and is also abandoned. Only a
/// fully parsed city is followed by the random throttle pause.
#[instrument(level = "info", skip_all, fields(city = %city.display_name, id = %city.id))]
pub async fn fetch_stations<F: PageFetch>(fetcher: &F, endpoints: &Endpoints, city: &CityRef) -> StationBatch {
    let url = endpoints.station_url(city);

    let body = match fetcher.fetch(&url, random_user_agent()).await {
        Ok(body) => body,
        Err(e) => {
            error!(%url, error = %e, "Failed to fetch data after multiple attempts; abandoning city");
            return StationBatch::abandoned(Vec::new());
        }
    };

    debug!(state = %TaskState::Parsing, bytes = body.len());
    let mut records = Vec::new();
    if let Err(e) = parse_line_doc(&city.display_name, &body, &mut records) {
        let truncated = e
            .downcast_ref::<serde_json::Error>()
            .is_some_and(looks_truncated);
        error!(
            error = %e,
            truncated,
            kept = records.len(),
            body_preview = %truncate_for_log(&body, 200),
            "Error processing city document"
        );
        return StationBatch::abandoned(records);
    }

    info!(count = records.len(), "Parsed city stations");
    sleep(throttle_interval()).await;
    StationBatch::done(records)
}

/// Flatten a subway document into `out`, in document order.
///
/// Records are pushed as they are read, so on error `out` holds everything
/// parsed before the malformed entry. A line without a name is only an
/// error if it lists stations.
pub fn parse_line_doc(city: &str, body: &str, out: &mut Vec<StationRecord>) -> Result<(), Box<dyn Error>> {
    let doc: RawLineDoc = serde_json::from_str(body)?;

    for raw_line in doc.lines {
        let line: RawLine = serde_json::from_value(raw_line)?;
        let line_name = line.effective_name();

        for raw_station in line.stations {
            let line_name = line_name.as_deref().ok_or("line entry with stations but no name (`ln`)")?;
            let station: RawStation = serde_json::from_value(raw_station)?;
            debug!(%city, line = %line_name, station = %station.name, "Station");
            out.push(StationRecord::new(city, line_name, station.name));
        }
    }
    Ok(())
}
