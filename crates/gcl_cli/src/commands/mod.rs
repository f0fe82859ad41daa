//! CLI command implementations.

pub mod append;
pub mod create;
pub mod inspect;
pub mod read;
pub mod remote;
pub mod serve;
pub mod tail;

use gcl_core::{LogRecord, LogStore, Name, StoreConfig};
use serde::Serialize;
use std::path::Path;

/// Result type shared by the commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens the log `name` under `dir`.
pub fn open_log(dir: &Path, name: &str) -> CommandResult<LogStore> {
    let config = StoreConfig::default().log_dir(dir);
    Ok(LogStore::open(&config, Name::parse(name))?)
}

/// One record as printed.
#[derive(Debug, Serialize)]
pub struct RecordView {
    /// Record number.
    pub recno: u64,
    /// Commit time.
    pub timestamp: String,
    /// Payload as text, lossily decoded.
    pub payload: String,
    /// Payload length in bytes.
    pub length: usize,
}

impl From<&LogRecord> for RecordView {
    fn from(record: &LogRecord) -> Self {
        Self {
            recno: record.recno,
            timestamp: record.timestamp.to_string(),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
            length: record.payload.len(),
        }
    }
}

/// Prints records as text lines or a JSON array.
pub fn print_records(records: &[LogRecord], format: &str) -> CommandResult {
    let views: Vec<RecordView> = records.iter().map(RecordView::from).collect();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&views)?),
        _ => {
            for view in &views {
                println!("{:>8}  {}  {}", view.recno, view.timestamp, view.payload);
            }
        }
    }
    Ok(())
}
