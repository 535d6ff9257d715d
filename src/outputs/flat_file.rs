//! Append-only flat-file mirror of the `info` table.
//!
//! One UTF-8 line per record, `city,line,name`, no header. Fields are not
//! quoted or escaped; see [`StationRecord::to_flat_row`].

use super::RecordWriter;
use crate::models::StationRecord;
use std::error::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

/// An open handle on the flat file, positioned for appends.
#[derive(Debug)]
pub struct FlatFile {
    path: String,
    file: File,
}

impl FlatFile {
    /// Open `path` for appending, creating it if needed. Existing rows are kept.
    #[instrument(level = "info")]
    pub async fn open(path: &str) -> Result<Self, Box<dyn Error>> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        info!("Opened flat file for appending");
        Ok(Self {
            path: path.to_string(),
            file,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl RecordWriter for FlatFile {
    async fn write_record(&mut self, record: &StationRecord) -> Result<(), Box<dyn Error>> {
        let mut row = record.to_flat_row();
        row.push('\n');
        // one write per row so a reader never observes half a record
        self.file.write_all(row.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}
