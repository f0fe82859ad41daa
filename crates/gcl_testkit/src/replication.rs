//! Replication harness over a mock transport.
//!
//! Drives a [`ReplicationCoordinator`] without a network: forwards are
//! recorded and acknowledgments are injected by the test.

use gcl_core::{Name, ServerId};
use gcl_protocol::{Command, Packet};
use gcl_server::{
    MockTransport, PendingReply, ReplicaEndpoint, ReplicaEvent, ReplicaSet, ReplicationConfig,
    ReplicationCoordinator, RequestKey,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A coordinator, its mock transport and a replica set.
pub struct ReplicationHarness {
    /// The coordinator under test.
    pub coordinator: ReplicationCoordinator,
    /// Records forwarded packets.
    pub transport: Arc<MockTransport>,
    /// Replica set used by [`ReplicationHarness::publish`].
    pub replicas: ReplicaSet,
    _events: mpsc::UnboundedReceiver<ReplicaEvent>,
}

impl ReplicationHarness {
    /// Creates a harness whose local server is `local`, replicating to the
    /// named servers with `quorum`.
    pub fn new(local: &str, replicas: &[&str], quorum: usize) -> Self {
        let transport = Arc::new(MockTransport::new());
        let (coordinator, events) = ReplicationCoordinator::new(
            Name::parse(local),
            ReplicationConfig::default().with_quorum(quorum),
            transport.clone(),
        );
        Self {
            coordinator,
            transport,
            replicas: replica_set(replicas),
            _events: events,
        }
    }

    /// Starts replicating one publish. Returns the request key and the
    /// writer's pending reply.
    ///
    /// # Panics
    ///
    /// Panics if the coordinator refuses the request.
    pub fn publish(&self, payload: &[u8]) -> (RequestKey, PendingReply) {
        let before = self.transport.sent().len();
        let forward = Packet::new(Command::PUBLISH).with_payload(payload.to_vec());
        let success = Packet::new(Command::ACK_CREATED).with_request_id(1);
        let reply = self
            .coordinator
            .replicate(&self.replicas, forward, success)
            .expect("replicate");
        let key = self
            .transport
            .sent()
            .get(before)
            .and_then(|(_, packet)| packet.request_id)
            .unwrap_or(0);
        (key, reply)
    }

    /// Delivers an acknowledgment from `replica`.
    pub fn ack(&self, key: RequestKey, replica: &str) {
        self.coordinator.on_ack(key, Name::parse(replica));
    }
}

/// Builds a replica set of named servers on placeholder addresses.
pub fn replica_set(names: &[&str]) -> ReplicaSet {
    ReplicaSet::new(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ReplicaEndpoint::new(server(name), format!("127.0.0.1:{}", 7000 + i))),
    )
}

/// Server identity for a name.
pub fn server(name: &str) -> ServerId {
    Name::parse(name)
}
