//! Owner lookup for log identities.
//!
//! A routing layer asks which server owns a log before sending it requests.

use gcl_core::{LogIdentity, ServerId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps a log identity to the server responsible for it.
pub trait OwnerLookup: Send + Sync {
    /// Returns the owning server, if known.
    fn find_owner(&self, identity: &LogIdentity) -> Option<ServerId>;
}

/// A fixed owner table with an optional fallback server.
#[derive(Debug, Default)]
pub struct StaticOwners {
    owners: RwLock<HashMap<LogIdentity, ServerId>>,
    fallback: Option<ServerId>,
}

impl StaticOwners {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server answering for logs not in the table.
    #[must_use]
    pub fn with_fallback(mut self, server: ServerId) -> Self {
        self.fallback = Some(server);
        self
    }

    /// Records `server` as the owner of `identity`.
    pub fn assign(&self, identity: LogIdentity, server: ServerId) {
        self.owners.write().insert(identity, server);
    }

    /// Forgets the owner of `identity`.
    pub fn remove(&self, identity: &LogIdentity) -> Option<ServerId> {
        self.owners.write().remove(identity)
    }
}

impl OwnerLookup for StaticOwners {
    fn find_owner(&self, identity: &LogIdentity) -> Option<ServerId> {
        self.owners.read().get(identity).copied().or(self.fallback)
    }
}
