//! Append command implementation.

use super::{open_log, CommandResult};
use gcl_core::Timestamp;
use std::path::Path;

/// Runs the append command.
pub fn run(dir: &Path, name: &str, records: &[String]) -> CommandResult {
    let store = open_log(dir, name)?;
    for payload in records {
        let recno = store.append(payload.as_bytes(), Timestamp::now())?;
        println!("{recno}");
    }
    store.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{create, open_log};

    #[test]
    fn appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        create::run(dir.path(), "log", &[]).unwrap();
        run(dir.path(), "log", &["hello".into(), "world".into()]).unwrap();

        let store = open_log(dir.path(), "log").unwrap();
        assert_eq!(store.last_recno(), 2);
        assert_eq!(store.read(1).unwrap().payload, b"hello");
    }

    #[test]
    fn missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(dir.path(), "absent", &["x".into()]).is_err());
    }
}
