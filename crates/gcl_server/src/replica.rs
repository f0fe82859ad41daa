//! Replica sets.

use gcl_core::ServerId;
use std::fmt;

/// A replica's identity and network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaEndpoint {
    /// Server identity.
    pub id: ServerId,
    /// `host:port` to connect to.
    pub addr: String,
}

impl ReplicaEndpoint {
    /// Creates an endpoint.
    pub fn new(id: ServerId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }
}

impl fmt::Display for ReplicaEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// The servers holding copies of one log.
///
/// Duplicate identities are dropped on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaSet {
    members: Vec<ReplicaEndpoint>,
}

impl ReplicaSet {
    /// Creates a replica set.
    #[must_use]
    pub fn new(members: impl IntoIterator<Item = ReplicaEndpoint>) -> Self {
        let mut set = Self::default();
        for member in members {
            if !set.contains(&member.id) {
                set.members.push(member);
            }
        }
        set
    }

    /// All members, including the local server if listed.
    #[must_use]
    pub fn members(&self) -> &[ReplicaEndpoint] {
        &self.members
    }

    /// Members other than `local`.
    pub fn forward_targets<'a>(
        &'a self,
        local: &'a ServerId,
    ) -> impl Iterator<Item = &'a ReplicaEndpoint> + 'a {
        self.members.iter().filter(move |m| &m.id != local)
    }

    /// Returns true if `id` is a member.
    #[must_use]
    pub fn contains(&self, id: &ServerId) -> bool {
        self.members.iter().any(|m| &m.id == id)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcl_core::Name;

    fn endpoint(name: &str, port: u16) -> ReplicaEndpoint {
        ReplicaEndpoint::new(Name::parse(name), format!("127.0.0.1:{port}"))
    }

    #[test]
    fn forward_targets_skip_local() {
        let set = ReplicaSet::new([endpoint("a", 1), endpoint("b", 2), endpoint("c", 3)]);
        let local = Name::parse("b");
        let targets: Vec<_> = set.forward_targets(&local).map(|m| m.addr.clone()).collect();
        assert_eq!(targets, vec!["127.0.0.1:1", "127.0.0.1:3"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn duplicates_dropped() {
        let set = ReplicaSet::new([endpoint("a", 1), endpoint("a", 2)]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.members()[0].addr, "127.0.0.1:1");
        assert!(set.contains(&Name::parse("a")));
        assert!(!ReplicaSet::default().contains(&Name::parse("a")));
    }
}
