//! Test fixtures and log helpers.

use gcl_core::{LogStore, MetadataSet, Name, StoreConfig, Timestamp};
use std::ops::Deref;
use std::path::Path;
use tempfile::TempDir;

/// A test log with automatic cleanup.
pub struct TestLog {
    /// The log store.
    pub store: LogStore,
    /// Configuration the store was created with.
    pub config: StoreConfig,
    temp_dir: Option<TempDir>,
}

impl TestLog {
    /// Creates an in-memory log.
    ///
    /// # Panics
    ///
    /// Panics if the log cannot be created.
    pub fn memory() -> Self {
        Self::memory_with(StoreConfig::default())
    }

    /// Creates an in-memory log with `config`.
    ///
    /// # Panics
    ///
    /// Panics if the log cannot be created.
    pub fn memory_with(config: StoreConfig) -> Self {
        let store = LogStore::in_memory(Name::parse("test-log"), &MetadataSet::new(), &config)
            .expect("Failed to create in-memory log");
        Self {
            store,
            config,
            temp_dir: None,
        }
    }

    /// Creates a file-backed log in a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory or log cannot be created.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = StoreConfig::default()
            .log_dir(temp_dir.path())
            .sync_on_append(false);
        let store = LogStore::create(&config, Name::parse("test-log"), &MetadataSet::new())
            .expect("Failed to create log");
        Self {
            store,
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Directory holding the log file, if file-backed.
    pub fn dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes and reopens a file-backed log.
    ///
    /// # Panics
    ///
    /// Panics for in-memory logs or if reopening fails.
    #[must_use]
    pub fn reopen(self) -> Self {
        let temp_dir = self.temp_dir.expect("only file logs can be reopened");
        let identity = *self.store.identity();
        self.store.close().expect("Failed to close log");
        drop(self.store);
        let store = LogStore::open(&self.config, identity).expect("Failed to reopen log");
        Self {
            store,
            config: self.config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Appends `count` records with payloads `record-1`, `record-2`, ...
    ///
    /// # Panics
    ///
    /// Panics if an append fails.
    pub fn fill(&self, count: u64) {
        for i in 0..count {
            let recno = self.store.last_recno() + 1;
            let got = self
                .store
                .append(record_payload(recno).as_bytes(), Timestamp::now())
                .expect("Failed to append");
            assert_eq!(got, recno, "append {i} got an unexpected recno");
        }
    }
}

impl Deref for TestLog {
    type Target = LogStore;

    fn deref(&self) -> &LogStore {
        &self.store
    }
}

/// Payload [`TestLog::fill`] writes for `recno`.
#[must_use]
pub fn record_payload(recno: u64) -> String {
    format!("record-{recno}")
}

/// Runs `f` with an in-memory log.
pub fn with_memory_log<F, R>(f: F) -> R
where
    F: FnOnce(&LogStore) -> R,
{
    let log = TestLog::memory();
    f(&log.store)
}

/// Runs `f` with a file-backed log.
pub fn with_temp_log<F, R>(f: F) -> R
where
    F: FnOnce(&LogStore) -> R,
{
    let log = TestLog::file();
    f(&log.store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_and_reopen() {
        let log = TestLog::file();
        log.fill(5);
        assert!(log.dir().is_some());
        let log = log.reopen();
        assert_eq!(log.last_recno(), 5);
        assert_eq!(log.read(3).unwrap().payload, record_payload(3).as_bytes());
    }

    #[test]
    fn memory_helpers() {
        let last = with_memory_log(|store| {
            store.append(b"x", Timestamp::now()).unwrap();
            store.last_recno()
        });
        assert_eq!(last, 1);
        assert!(TestLog::memory().dir().is_none());
    }
}
