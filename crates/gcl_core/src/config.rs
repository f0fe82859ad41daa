//! Log store configuration.

use crate::index_cache::DEFAULT_INDEX_CAPACITY;
use crate::name::LogIdentity;
use crate::record::DEFAULT_MAX_RECORD_SIZE;
use std::path::{Path, PathBuf};

/// File extension of log files.
pub const LOG_FILE_EXTENSION: &str = "gcl";

/// Configuration shared by every log a process opens.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Largest accepted record payload in bytes.
    pub max_record_size: usize,

    /// Number of `(recno, offset)` pairs cached per log.
    pub index_cache_capacity: usize,

    /// Whether to sync the file after every append (safer but slower).
    pub sync_on_append: bool,

    /// Directory holding `<printable-name>.gcl` files.
    pub log_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            index_cache_capacity: DEFAULT_INDEX_CAPACITY,
            sync_on_append: true,
            log_dir: PathBuf::from("gcls"),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum record payload size.
    #[must_use]
    pub const fn max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Sets the index cache capacity.
    #[must_use]
    pub const fn index_cache_capacity(mut self, capacity: usize) -> Self {
        self.index_cache_capacity = capacity;
        self
    }

    /// Sets whether to sync after every append.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Sets the log directory.
    #[must_use]
    pub fn log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Path of the file holding `identity`.
    #[must_use]
    pub fn log_path(&self, identity: &LogIdentity) -> PathBuf {
        self.log_dir
            .join(format!("{}.{LOG_FILE_EXTENSION}", identity.printable()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.max_record_size, DEFAULT_MAX_RECORD_SIZE);
        assert_eq!(config.index_cache_capacity, DEFAULT_INDEX_CAPACITY);
        assert!(config.sync_on_append);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .max_record_size(10)
            .index_cache_capacity(8)
            .sync_on_append(false)
            .log_dir("/var/gcl");

        assert_eq!(config.max_record_size, 10);
        assert_eq!(config.index_cache_capacity, 8);
        assert!(!config.sync_on_append);
        assert_eq!(config.log_dir, PathBuf::from("/var/gcl"));
    }

    #[test]
    fn log_path_uses_printable_name() {
        let name = Name::parse("x");
        let path = StoreConfig::new().log_dir("/d").log_path(&name);
        assert_eq!(
            path,
            PathBuf::from(format!("/d/{}.gcl", name.printable()))
        );
    }
}
