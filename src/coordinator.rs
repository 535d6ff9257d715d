//! Fan-out of one task per city and the join that ends a crawl.
//!
//! Every city runs `Fetching -> Parsing -> Persisting` independently; a city
//! that gives up ends `Abandoned` without touching any other city. Tasks are
//! driven concurrently from a single stream, unbounded unless a worker limit
//! is given.

use crate::api::PageFetch;
use crate::models::{CityRef, TaskState};
use crate::outputs::{RecordWriter, Sink};
use crate::scrapers::Endpoints;
use crate::scrapers::stations::fetch_stations;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use tracing::{debug, error, info, instrument};

/// Totals for one crawl.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cities: usize,
    pub done: usize,
    pub abandoned: usize,
    pub persisted: usize,
    pub abandoned_cities: Vec<String>,
}

/// Outcome of a single city task.
#[derive(Debug)]
struct CityOutcome {
    city: String,
    state: TaskState,
    persisted: usize,
}

/// Crawl every city in `cities` and persist its records through `sink`.
///
/// `max_workers` bounds how many cities are in flight at once; `None` starts
/// them all immediately. Returns once every city reached a terminal state.
#[instrument(level = "info", skip_all, fields(cities = cities.len()))]
pub async fn run_all<F, T, W>(
    fetcher: &F,
    endpoints: &Endpoints,
    sink: &Sink<T, W>,
    cities: &[CityRef],
    max_workers: Option<usize>,
) -> RunSummary
where
    F: PageFetch,
    T: RecordWriter,
    W: RecordWriter,
{
    let limit = max_workers.unwrap_or(cities.len()).max(1);
    info!(limit, "Starting city tasks");

    let outcomes: Vec<CityOutcome> = stream::iter(cities)
        .map(|city| run_city(fetcher, endpoints, sink, city))
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut summary = RunSummary {
        cities: cities.len(),
        ..RunSummary::default()
    };
    for outcome in outcomes {
        summary.persisted += outcome.persisted;
        match outcome.state {
            TaskState::Done => summary.done += 1,
            _ => {
                summary.abandoned += 1;
                summary.abandoned_cities.push(outcome.city);
            }
        }
    }

    info!(
        total = summary.cities,
        done = summary.done,
        abandoned = summary.abandoned,
        persisted = summary.persisted,
        abandoned_cities = %summary.abandoned_cities.iter().join(", "),
        "All city tasks finished"
    );
    summary
}

/// One city from `Pending` to a terminal state.
///
/// Records are persisted in parse order. The first write failure abandons
/// the rest of this city's records.
#[instrument(level = "info", skip_all, fields(city = %city.display_name))]
async fn run_city<F, T, W>(fetcher: &F, endpoints: &Endpoints, sink: &Sink<T, W>, city: &CityRef) -> CityOutcome
where
    F: PageFetch,
    T: RecordWriter,
    W: RecordWriter,
{
    debug!(state = %TaskState::Pending);
    debug!(state = %TaskState::Fetching);
    let batch = fetch_stations(fetcher, endpoints, city).await;

    debug!(state = %TaskState::Persisting, records = batch.records.len());
    let mut persisted = 0;
    let mut state = batch.state;
    for record in &batch.records {
        if let Err(e) = sink.persist(record).await {
            error!(
                error = %e,
                persisted,
                remaining = batch.records.len() - persisted,
                "Persistence failed; abandoning city"
            );
            state = TaskState::Abandoned;
            break;
        }
        persisted += 1;
    }

    debug_assert!(state.is_terminal());
    info!(%state, persisted, "City finished");
    CityOutcome {
        city: city.display_name.clone(),
        state,
        persisted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StationRecord;
    use crate::outputs::tests::{FailingWriter, memory_sink};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::error::Error;

    /// Serves canned bodies by URL; unknown URLs fail.
    #[derive(Default)]
    struct CannedFetch {
        pages: HashMap<String, String>,
        calls: RefCell<Vec<String>>,
    }

    impl PageFetch for CannedFetch {
        async fn fetch(&self, url: &str, _user_agent: &str) -> Result<String, Box<dyn Error>> {
            self.calls.borrow_mut().push(url.to_string());
            tokio::task::yield_now().await;
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| format!("404 for {url}").into())
        }
    }

    fn city(id: &str, key: &str, name: &str) -> CityRef {
        CityRef {
            id: id.to_string(),
            key: key.to_string(),
            display_name: name.to_string(),
        }
    }

    fn doc_for(lines: usize, stations: usize, tag: &str) -> String {
        let lines = (0..lines)
            .map(|l| {
                let st = (0..stations)
                    .map(|s| format!(r#"{{"n": "{tag}-{l}-{s}"}}"#))
                    .join(",");
                format!(r#"{{"ln": "{l}号线", "st": [{st}]}}"#)
            })
            .join(",");
        format!(r#"{{"l": [{lines}]}}"#)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cities_equal_sequential_union() {
        let endpoints = Endpoints::default();
        let cities: Vec<CityRef> = (0..12)
            .map(|i| city(&i.to_string(), &format!("c{i}"), &format!("城市{i}")))
            .collect();

        let mut fetcher = CannedFetch::default();
        let mut expected: HashMap<String, Vec<StationRecord>> = HashMap::new();
        for (i, c) in cities.iter().enumerate() {
            let body = doc_for(1 + i % 3, 2 + i % 5, &c.key);
            let mut records = Vec::new();
            crate::scrapers::stations::parse_line_doc(&c.display_name, &body, &mut records).unwrap();
            expected.insert(c.display_name.clone(), records);
            fetcher.pages.insert(endpoints.station_url(c), body);
        }

        let sink = memory_sink();
        let summary = run_all(&fetcher, &endpoints, &sink, &cities, None).await;
        let (table, flat) = sink.into_parts();

        let total: usize = expected.values().map(Vec::len).sum();
        assert_eq!(summary.done, 12);
        assert_eq!(summary.persisted, total);

        for written in [&table, &flat] {
            assert_eq!(written.len(), total);
            let by_city = written.iter().cloned().into_group_map_by(|r| r.city.clone());
            // per-city order preserved, nothing lost or duplicated
            assert_eq!(by_city, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_city_does_not_affect_others() {
        let endpoints = Endpoints::default();
        let good = city("1", "bj", "北京");
        let bad = city("2", "sh", "上海");

        let mut fetcher = CannedFetch::default();
        fetcher
            .pages
            .insert(endpoints.station_url(&good), doc_for(1, 3, "bj"));
        fetcher
            .pages
            .insert(endpoints.station_url(&bad), "{\"l\": [".to_string());

        let sink = memory_sink();
        let summary = run_all(&fetcher, &endpoints, &sink, &[good, bad], Some(1)).await;

        assert_eq!(summary.done, 1);
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.abandoned_cities, vec!["上海".to_string()]);
        assert_eq!(summary.persisted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_records_are_persisted() {
        let endpoints = Endpoints::default();
        let c = city("1", "bj", "北京");
        let mut fetcher = CannedFetch::default();
        fetcher.pages.insert(
            endpoints.station_url(&c),
            r#"{"l": [{"ln": "1号线", "st": [{"n": "苹果园"}, {"n": "古城"}]}, {"ln": "2号线", "st": [{"x": 1}]}]}"#.to_string(),
        );

        let sink = memory_sink();
        let summary = run_all(&fetcher, &endpoints, &sink, &[c], None).await;
        let (table, flat) = sink.into_parts();

        assert_eq!(summary.abandoned, 1);
        assert_eq!(table.len(), 2);
        assert_eq!(flat, table);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_abandons_only_that_city() {
        let endpoints = Endpoints::default();
        let c = city("1", "bj", "北京");
        let mut fetcher = CannedFetch::default();
        fetcher.pages.insert(endpoints.station_url(&c), doc_for(1, 4, "bj"));

        let failing = FailingWriter {
            capacity: 2,
            written: Vec::new(),
        };
        let sink = Sink::new(failing, Vec::<StationRecord>::new());
        let summary = run_all(&fetcher, &endpoints, &sink, &[c], None).await;
        let (table, flat) = sink.into_parts();

        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.persisted, 2);
        assert_eq!(table.written.len(), 2);
        assert_eq!(flat.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_city_is_abandoned_and_logged() {
        use crate::api::tests::FlakyFetch;
        use crate::api::{RetryFetch, RetryPolicy};
        use std::io;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl io::Write for Captured {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let endpoints = Endpoints::default();
        let retrying = RetryFetch::new(FlakyFetch::new(u32::MAX, ""), RetryPolicy::default());

        let sink = memory_sink();
        let summary = run_all(&retrying, &endpoints, &sink, &[city("1", "bj", "北京")], None).await;
        let (table, flat) = sink.into_parts();

        assert_eq!(
            summary,
            RunSummary {
                cities: 1,
                done: 0,
                abandoned: 1,
                persisted: 0,
                abandoned_cities: vec!["北京".to_string()],
            }
        );
        assert!(table.is_empty());
        assert!(flat.is_empty());

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("fetch attempt failed; retrying").count(), 2);
        assert!(logs.contains("fetch exhausted retries"));
        assert!(logs.contains("abandoning city"));
        assert!(logs.contains("北京"));
    }

    #[tokio::test]
    async fn test_no_cities_is_a_no_op() {
        let fetcher = CannedFetch::default();
        let sink = memory_sink();
        let summary = run_all(&fetcher, &Endpoints::default(), &sink, &[], None).await;
        assert_eq!(summary, RunSummary::default());
        assert!(fetcher.calls.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_into_sqlite_and_flat_file() {
        use crate::api::{RetryFetch, RetryPolicy};
        use crate::outputs::flat_file::FlatFile;
        use crate::outputs::sqlite::{SqliteTable, find_by_city_line};
        use crate::scrapers::cities::fetch_cities;

        let endpoints = Endpoints::default();
        let beijing = city("1", "bj", "北京");
        let mut fetcher = CannedFetch::default();
        fetcher.pages.insert(
            endpoints.listing_url.to_string(),
            r#"<div class="city-list fl"><a id="1" cityname="bj">北京</a></div>
               <div class="more-city-list"></div>"#
                .to_string(),
        );
        fetcher.pages.insert(
            endpoints.station_url(&beijing),
            r#"{"l": [{"ln": "1号线", "st": [{"n": "苹果园"}, {"n": "古城"}]}]}"#.to_string(),
        );

        let (popular, other) = fetch_cities(&fetcher, endpoints.listing_url.as_str()).await;
        let cities: Vec<CityRef> = popular.into_iter().chain(other).collect();
        assert_eq!(cities, vec![beijing]);

        let tmp = tempfile::tempdir().unwrap();
        let csv_path = tmp.path().join("subway.csv");
        let csv_path = csv_path.to_str().unwrap();
        let table = SqliteTable::open("sqlite::memory:").await.unwrap();
        let flat = FlatFile::open(csv_path).await.unwrap();
        let sink = Sink::new(table, flat);

        let retrying = RetryFetch::new(fetcher, RetryPolicy::default());
        let summary = run_all(&retrying, &endpoints, &sink, &cities, None).await;
        assert_eq!(summary.persisted, 2);

        let (mut table, flat) = sink.into_parts();
        drop(flat);
        let rows = find_by_city_line(table.connection(), "北京", "1号线")
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                StationRecord::new("北京", "1号线", "苹果园"),
                StationRecord::new("北京", "1号线", "古城"),
            ]
        );
        let contents = tokio::fs::read_to_string(csv_path).await.unwrap();
        assert_eq!(contents, "北京,1号线,苹果园\n北京,1号线,古城\n");
    }
}
