//! Open logs held by the server.

use crate::replica::{ReplicaEndpoint, ReplicaSet};
use gcl_core::{GclError, GclResult, LogIdentity, LogStore, MetadataSet, StoreConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// An open log and the servers replicating it.
#[derive(Debug)]
pub struct LogHandle {
    store: Arc<LogStore>,
    replicas: RwLock<ReplicaSet>,
}

impl LogHandle {
    /// Wraps an open store with an empty replica set.
    pub fn new(store: LogStore) -> Self {
        Self {
            store: Arc::new(store),
            replicas: RwLock::new(ReplicaSet::default()),
        }
    }

    /// The log store.
    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// The log's replica set, filled from `defaults` on first use.
    pub fn replica_set(&self, defaults: &[ReplicaEndpoint]) -> ReplicaSet {
        {
            let replicas = self.replicas.read();
            if !replicas.is_empty() {
                return replicas.clone();
            }
        }
        let mut replicas = self.replicas.write();
        if replicas.is_empty() {
            *replicas = ReplicaSet::new(defaults.iter().cloned());
            debug!(log = %self.store.identity(), members = replicas.len(), "initialized replica set");
        }
        replicas.clone()
    }

    /// Replaces the replica set. Requests already forwarded are unaffected.
    pub fn set_replicas(&self, replicas: ReplicaSet) {
        *self.replicas.write() = replicas;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backing {
    Files,
    Memory,
}

/// Identity-keyed table of open logs.
///
/// File-backed registries open logs from the log directory on first use.
#[derive(Debug)]
pub struct LogRegistry {
    config: StoreConfig,
    backing: Backing,
    logs: RwLock<HashMap<LogIdentity, Arc<LogHandle>>>,
}

impl LogRegistry {
    /// Creates a registry over `config.log_dir`.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            backing: Backing::Files,
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry whose logs live in memory.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self {
            backing: Backing::Memory,
            ..Self::new(config)
        }
    }

    /// Store settings.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates a new log.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::AlreadyExists`] if the log exists.
    pub fn create(&self, identity: LogIdentity, metadata: &MetadataSet) -> GclResult<Arc<LogHandle>> {
        let mut logs = self.logs.write();
        if logs.contains_key(&identity) {
            return Err(GclError::AlreadyExists {
                name: identity.printable(),
            });
        }
        let store = match self.backing {
            Backing::Files => {
                std::fs::create_dir_all(&self.config.log_dir)?;
                LogStore::create(&self.config, identity, metadata)?
            }
            Backing::Memory => LogStore::in_memory(identity, metadata, &self.config)?,
        };
        let handle = Arc::new(LogHandle::new(store));
        logs.insert(identity, handle.clone());
        Ok(handle)
    }

    /// Returns the open log, opening it from disk if needed.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::LogNotFound`] if the log does not exist.
    pub fn open(&self, identity: LogIdentity) -> GclResult<Arc<LogHandle>> {
        if let Some(handle) = self.get(&identity) {
            return Ok(handle);
        }
        if self.backing == Backing::Memory {
            return Err(GclError::LogNotFound {
                name: identity.printable(),
            });
        }
        let mut logs = self.logs.write();
        if let Some(handle) = logs.get(&identity) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(LogHandle::new(LogStore::open(&self.config, identity)?));
        logs.insert(identity, handle.clone());
        Ok(handle)
    }

    /// Returns the log if it is open.
    pub fn get(&self, identity: &LogIdentity) -> Option<Arc<LogHandle>> {
        self.logs.read().get(identity).cloned()
    }

    /// Number of open logs.
    pub fn len(&self) -> usize {
        self.logs.read().len()
    }

    /// Returns true if no log is open.
    pub fn is_empty(&self) -> bool {
        self.logs.read().is_empty()
    }

    /// Closes every open log. Subscribers see the end of their streams.
    pub fn close_all(&self) {
        let logs: Vec<_> = self.logs.write().drain().collect();
        for (identity, handle) in logs {
            if let Err(e) = handle.store().close() {
                warn!(log = %identity, error = %e, "close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcl_core::{ErrorKind, Name, Timestamp};
    use tempfile::tempdir;

    #[test]
    fn memory_create_and_open() {
        let registry = LogRegistry::in_memory(StoreConfig::default());
        let id = Name::parse("mem");
        registry.create(id, &MetadataSet::new()).unwrap();
        assert_eq!(registry.len(), 1);

        let err = registry.create(id, &MetadataSet::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let handle = registry.open(id).unwrap();
        handle.store().append(b"x", Timestamp::now()).unwrap();
        assert_eq!(registry.open(id).unwrap().store().last_recno(), 1);

        let err = registry.open(Name::parse("other")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn files_reopen_after_close_all() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::default().log_dir(dir.path().join("logs"));
        let id = Name::parse("disk");

        let registry = LogRegistry::new(config.clone());
        let handle = registry.create(id, &MetadataSet::new()).unwrap();
        handle.store().append(b"a", Timestamp::now()).unwrap();
        handle.store().append(b"b", Timestamp::now()).unwrap();
        registry.close_all();
        assert!(registry.is_empty());
        assert!(handle.store().is_closed());

        let registry = LogRegistry::new(config);
        let reopened = registry.open(id).unwrap();
        assert_eq!(reopened.store().last_recno(), 2);
        assert_eq!(reopened.store().read(2).unwrap().payload, b"b");
    }

    #[test]
    fn replica_set_initialized_lazily() {
        let registry = LogRegistry::in_memory(StoreConfig::default());
        let handle = registry.create(Name::parse("r"), &MetadataSet::new()).unwrap();
        assert!(handle.replica_set(&[]).is_empty());

        let defaults = vec![ReplicaEndpoint::new(Name::parse("a"), "127.0.0.1:1")];
        assert_eq!(handle.replica_set(&defaults).len(), 1);

        // Later defaults do not replace an initialized set.
        let other = vec![
            ReplicaEndpoint::new(Name::parse("b"), "127.0.0.1:2"),
            ReplicaEndpoint::new(Name::parse("c"), "127.0.0.1:3"),
        ];
        assert_eq!(handle.replica_set(&other).len(), 1);

        handle.set_replicas(ReplicaSet::new(other.clone()));
        assert_eq!(handle.replica_set(&defaults).members(), &other[..]);
    }
}
