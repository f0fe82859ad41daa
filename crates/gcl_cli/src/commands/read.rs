//! Read command implementation.

use super::{open_log, print_records, CommandResult};
use std::path::Path;

/// Runs the read command.
pub fn run(dir: &Path, name: &str, recno: u64, count: u64, format: &str) -> CommandResult {
    let store = open_log(dir, name)?;
    let records = store.read_range(recno, count)?;
    print_records(&records, format)
}
