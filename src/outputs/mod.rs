//! Persistence of station records to the relational table and the flat file.
//!
//! # Submodules
//!
//! - [`sqlite`]: The `info(city, line, name)` table, plus the read-only lookups
//! - [`flat_file`]: The append-only `city,line,name` text mirror
//!
//! # Locking
//!
//! [`Sink`] owns one mutex per backend. A record is written to the table
//! under the first lock and then appended to the file under the second, so
//! a slow file append never holds up another worker's insert, and no two
//! workers interleave partial writes on either backend.
//!
//! ```text
//! data/
//! ├── city_lines.db   # info(city TEXT, line TEXT, name TEXT)
//! └── subway.csv      # 北京,1号线,苹果园
//! ```

pub mod flat_file;
pub mod sqlite;

use crate::models::StationRecord;
use std::error::Error;
use tokio::sync::Mutex;
use tracing::{instrument, trace};

/// A durable destination for station records.
///
/// Each call must leave the record fully committed before returning.
pub trait RecordWriter {
    async fn write_record(&mut self, record: &StationRecord) -> Result<(), Box<dyn Error>>;
}

/// Serializes concurrent writes to a table backend `T` and a file backend `F`.
#[derive(Debug)]
pub struct Sink<T, F> {
    table: Mutex<T>,
    flat: Mutex<F>,
}

impl<T, F> Sink<T, F>
where
    T: RecordWriter,
    F: RecordWriter,
{
    pub fn new(table: T, flat: F) -> Self {
        Self {
            table: Mutex::new(table),
            flat: Mutex::new(flat),
        }
    }

    /// Write `record` to both backends.
    ///
    /// Fails fast: if the table insert fails, the file append is not attempted.
    #[instrument(level = "trace", skip_all)]
    pub async fn persist(&self, record: &StationRecord) -> Result<(), Box<dyn Error>> {
        {
            let mut table = self.table.lock().await;
            table.write_record(record).await?;
        }
        {
            let mut flat = self.flat.lock().await;
            flat.write_record(record).await?;
        }
        trace!(city = %record.city, line = %record.line, station = %record.station_name, "Persisted");
        Ok(())
    }

    /// Release both backends once no worker holds a reference.
    pub fn into_parts(self) -> (T, F) {
        (self.table.into_inner(), self.flat.into_inner())
    }
}

/// In-memory stand-in used by tests.
#[cfg(test)]
impl RecordWriter for Vec<StationRecord> {
    async fn write_record(&mut self, record: &StationRecord) -> Result<(), Box<dyn Error>> {
        tokio::task::yield_now().await;
        self.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn memory_sink() -> Sink<Vec<StationRecord>, Vec<StationRecord>> {
        Sink::new(Vec::new(), Vec::new())
    }

    /// Accepts `capacity` records, then fails every write.
    pub(crate) struct FailingWriter {
        pub capacity: usize,
        pub written: Vec<StationRecord>,
    }

    impl RecordWriter for FailingWriter {
        async fn write_record(&mut self, record: &StationRecord) -> Result<(), Box<dyn Error>> {
            if self.written.len() >= self.capacity {
                return Err("disk I/O error".into());
            }
            self.written.push(record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_persist_writes_both_backends() {
        let sink = memory_sink();
        let record = StationRecord::new("北京", "1号线", "苹果园");

        sink.persist(&record).await.unwrap();

        let (table, flat) = sink.into_parts();
        assert_eq!(table, vec![record.clone()]);
        assert_eq!(flat, vec![record]);
    }

    #[tokio::test]
    async fn test_table_failure_skips_file_append() {
        let failing = FailingWriter {
            capacity: 0,
            written: Vec::new(),
        };
        let sink = Sink::new(failing, Vec::<StationRecord>::new());

        let res = sink.persist(&StationRecord::new("北京", "1号线", "苹果园")).await;

        assert!(res.is_err());
        let (_, flat) = sink.into_parts();
        assert!(flat.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_persist_loses_nothing() {
        use futures::future::join_all;

        let sink = memory_sink();
        let records: Vec<_> = (0..200)
            .map(|i| StationRecord::new(format!("city{}", i % 7), "1号线", format!("s{i}")))
            .collect();

        join_all(records.iter().map(|r| sink.persist(r))).await;

        let (mut table, mut flat) = sink.into_parts();
        let mut expected = records.clone();
        expected.sort();
        table.sort();
        flat.sort();
        assert_eq!(table, expected);
        assert_eq!(flat, expected);
    }
}
