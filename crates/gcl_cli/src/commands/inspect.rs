//! Inspect command implementation.

use super::create::id_label;
use super::{open_log, CommandResult};
use gcl_core::LogStore;
use serde::Serialize;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log name as printable identity.
    pub identity: String,
    /// On-disk format version.
    pub version: i64,
    /// Log type.
    pub log_type: i16,
    /// File size in bytes.
    pub size: u64,
    /// Number of records.
    pub record_count: u64,
    /// Timestamp of the first record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<String>,
    /// Timestamp of the last record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<String>,
    /// Metadata entries.
    pub metadata: Vec<MetadataEntry>,
}

/// One metadata entry.
#[derive(Debug, Serialize)]
pub struct MetadataEntry {
    /// Entry id label.
    pub id: String,
    /// Data length in bytes.
    pub length: usize,
    /// Data as text, lossily decoded.
    pub value: String,
}

/// Runs the inspect command.
pub fn run(dir: &Path, name: &str, format: &str) -> CommandResult {
    let store = open_log(dir, name)?;
    let result = inspect(&store)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects header, metadata and record statistics.
pub fn inspect(store: &LogStore) -> CommandResult<InspectResult> {
    let header = store.header();
    let last = store.last_recno();
    let (first_timestamp, last_timestamp) = if last == 0 {
        (None, None)
    } else {
        (
            Some(store.read(1)?.timestamp.to_string()),
            Some(store.read(last)?.timestamp.to_string()),
        )
    };

    Ok(InspectResult {
        identity: store.identity().printable(),
        version: header.version,
        log_type: header.log_type,
        size: store.size()?,
        record_count: last,
        first_timestamp,
        last_timestamp,
        metadata: store
            .metadata()
            .iter()
            .map(|(id, data)| MetadataEntry {
                id: id_label(id),
                length: data.len(),
                value: String::from_utf8_lossy(data).into_owned(),
            })
            .collect(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Log: {}", result.identity);
    println!("  Format version: {}", result.version);
    println!("  Log type:       {}", result.log_type);
    println!("  Size:           {} bytes", result.size);
    println!("  Records:        {}", result.record_count);
    if let (Some(first), Some(last)) = (&result.first_timestamp, &result.last_timestamp) {
        println!("  First record:   {first}");
        println!("  Last record:    {last}");
    }
    if result.metadata.is_empty() {
        println!("  Metadata:       none");
    } else {
        println!("  Metadata:");
        for entry in &result.metadata {
            println!("    {:<12} {:>6} bytes  {}", entry.id, entry.length, entry.value);
        }
    }
}
