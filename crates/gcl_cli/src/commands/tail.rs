//! Tail command implementation.

use super::{open_log, print_records, CommandResult};
use std::path::Path;

/// Runs the tail command.
pub fn run(dir: &Path, name: &str, from: Option<u64>, lines: u64, format: &str) -> CommandResult {
    let store = open_log(dir, name)?;
    let last = store.last_recno();
    if last == 0 {
        println!("(empty log)");
        return Ok(());
    }
    let start = start_recno(last, from, lines);
    let records = store.read_range(start, 0)?;
    print_records(&records, format)
}

/// First record to print.
pub(crate) fn start_recno(last: u64, from: Option<u64>, lines: u64) -> u64 {
    match from {
        Some(from) => from.max(1),
        None => last.saturating_sub(lines.max(1) - 1).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_positions() {
        assert_eq!(start_recno(100, None, 10), 91);
        assert_eq!(start_recno(5, None, 10), 1);
        assert_eq!(start_recno(5, None, 0), 5);
        assert_eq!(start_recno(5, Some(0), 10), 1);
        assert_eq!(start_recno(5, Some(3), 10), 3);
    }
}
