//! Replication coordinator.
//!
//! After a publish commits locally, the coordinator forwards it to every
//! other member of the log's replica set and answers the writer once
//! `quorum` replicas have acknowledged. The request stays tracked until
//! every forwarded replica has answered or the ack timeout passes.
//!
//! Request lifecycle:
//!
//! ```text
//! Created -> Forwarding -> AwaitingAcks -> QuorumReached -> Drained
//!                              |                              ^
//!                              +------------------------------+
//! ```

use crate::config::ReplicationConfig;
use crate::error::{ServerError, ServerResult};
use crate::replica::ReplicaSet;
use crate::transport::{EventSender, ReplicaEvent, ReplicaOutcome, ReplicaTransport, RequestKey};
use gcl_core::ServerId;
use gcl_protocol::{Command, Packet};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Progress of one replication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    /// Accepted, nothing sent yet.
    Created,
    /// Sends to replicas in progress.
    Forwarding,
    /// All sends started, quorum not yet reached.
    AwaitingAcks,
    /// The writer has its reply; remaining replicas may still answer.
    QuorumReached,
    /// Every forwarded replica has answered. Terminal.
    Drained,
}

/// Counters kept by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Requests started.
    pub requests: u64,
    /// Requests answered on quorum.
    pub quorum_replies: u64,
    /// Requests answered by the local commit alone.
    pub local_replies: u64,
    /// Requests whose forwards partly failed.
    pub partial: u64,
    /// Requests expired by the ack timeout.
    pub timeouts: u64,
    /// Duplicate acknowledgments ignored.
    pub duplicate_acks: u64,
}

/// Receives the reply for a replicated publish.
pub type PendingReply = oneshot::Receiver<Packet>;

struct ReplicationRequest {
    success: Packet,
    quorum: usize,
    forwarded: usize,
    acknowledged: HashSet<ServerId>,
    failed: HashSet<ServerId>,
    reply: Option<oneshot::Sender<Packet>>,
    state: ReplicationState,
    started: Instant,
}

impl ReplicationRequest {
    fn answered(&self) -> usize {
        self.acknowledged.len() + self.failed.len()
    }

    fn send_reply(&mut self, packet: Packet) {
        if let Some(reply) = self.reply.take() {
            if reply.send(packet).is_err() {
                debug!("writer went away before its reply");
            }
        }
    }
}

/// Forwards committed publishes and tracks replica acknowledgments.
pub struct ReplicationCoordinator {
    local: ServerId,
    config: ReplicationConfig,
    transport: Arc<dyn ReplicaTransport>,
    pending: Mutex<HashMap<RequestKey, ReplicationRequest>>,
    next_key: AtomicU64,
    events: EventSender,
    stats: Mutex<ReplicationStats>,
}

impl ReplicationCoordinator {
    /// Creates a coordinator.
    ///
    /// Replica answers arrive on the returned receiver; feed them to
    /// [`Self::handle_event`] or hand the receiver to [`Self::run`].
    pub fn new(
        local: ServerId,
        config: ReplicationConfig,
        transport: Arc<dyn ReplicaTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<ReplicaEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let coordinator = Self {
            local,
            config,
            transport,
            pending: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(1),
            events,
            stats: Mutex::new(ReplicationStats::default()),
        };
        (coordinator, receiver)
    }

    /// This server's identity.
    pub fn local(&self) -> &ServerId {
        &self.local
    }

    /// Replication settings.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Replicates a locally committed publish with the configured quorum.
    ///
    /// See [`Self::replicate_with_quorum`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ServiceUnavailable`] for an empty replica set.
    pub fn replicate(
        &self,
        replicas: &ReplicaSet,
        forward: Packet,
        success: Packet,
    ) -> ServerResult<PendingReply> {
        self.replicate_with_quorum(replicas, forward, success, self.config.quorum)
    }

    /// Forwards `forward` to every member of `replicas` other than this
    /// server. `success` is sent to the writer once `quorum` replicas have
    /// acknowledged.
    ///
    /// Failed sends are logged and shrink the number of acknowledgments
    /// that can arrive; the quorum is capped at that number. With nothing
    /// forwarded the local commit alone answers the writer.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ServiceUnavailable`] for an empty replica set.
    pub fn replicate_with_quorum(
        &self,
        replicas: &ReplicaSet,
        forward: Packet,
        success: Packet,
        quorum: usize,
    ) -> ServerResult<PendingReply> {
        if replicas.is_empty() {
            return Err(ServerError::ServiceUnavailable(
                "no replica set configured".into(),
            ));
        }

        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let mut request = ReplicationRequest {
            success,
            quorum,
            forwarded: 0,
            acknowledged: HashSet::new(),
            failed: HashSet::new(),
            reply: Some(tx),
            state: ReplicationState::Created,
            started: Instant::now(),
        };
        self.stats.lock().requests += 1;

        // Registered before sending so early answers find the request.
        request.state = ReplicationState::Forwarding;
        self.pending.lock().insert(key, request);

        let forward = forward.with_request_id(key);
        let mut forwarded = 0;
        let mut send_failures = 0;
        for target in replicas.forward_targets(&self.local) {
            match self
                .transport
                .forward(target, key, forward.clone(), self.events.clone())
            {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    send_failures += 1;
                    warn!(request = key, replica = %target, error = %e, "forward failed");
                }
            }
        }

        let mut pending = self.pending.lock();
        if let Some(request) = pending.get_mut(&key) {
            request.forwarded = forwarded;
            request.state = ReplicationState::AwaitingAcks;
            if send_failures > 0 {
                self.stats.lock().partial += 1;
                warn!(
                    request = key,
                    forwarded, send_failures, "partial replication"
                );
            }
            if forwarded > 0 && request.quorum > forwarded {
                warn!(
                    request = key,
                    quorum = request.quorum,
                    forwarded,
                    "quorum capped at forwarded replica count"
                );
                request.quorum = forwarded;
            }
            debug!(request = key, forwarded, quorum = request.quorum, "forwarded publish");
        }
        self.evaluate(&mut pending, key);
        Ok(rx)
    }

    /// Records an acknowledgment from `from`.
    ///
    /// Repeated acknowledgments from the same replica are ignored.
    pub fn on_ack(&self, request: RequestKey, from: ServerId) {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&request) else {
            debug!(request, replica = %from, "ack for unknown request");
            return;
        };
        if entry.failed.contains(&from) || !entry.acknowledged.insert(from) {
            self.stats.lock().duplicate_acks += 1;
            debug!(request, replica = %from, "duplicate ack ignored");
            return;
        }
        self.evaluate(&mut pending, request);
    }

    /// Records that `from` will not acknowledge.
    pub fn on_failure(&self, request: RequestKey, from: ServerId, reason: &str) {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&request) else {
            debug!(request, replica = %from, "failure for unknown request");
            return;
        };
        if entry.acknowledged.contains(&from) || !entry.failed.insert(from) {
            return;
        }
        warn!(request, replica = %from, reason, "replica did not acknowledge");
        self.evaluate(&mut pending, request);
    }

    /// Applies one replica answer.
    pub fn handle_event(&self, event: ReplicaEvent) {
        match event.outcome {
            ReplicaOutcome::Acked => self.on_ack(event.request, event.from),
            ReplicaOutcome::Rejected(command) => {
                self.on_failure(event.request, event.from, &format!("replied {command}"));
            }
            ReplicaOutcome::Failed(reason) => self.on_failure(event.request, event.from, &reason),
        }
    }

    /// Applies replica answers until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ReplicaEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
    }

    /// Drops requests started before `now - ack_timeout`. Writers still
    /// waiting get `NAK_S_GWTIMEOUT`. Returns the number dropped.
    pub fn expire(&self, now: Instant) -> usize {
        let timeout = self.config.ack_timeout;
        let mut pending = self.pending.lock();
        let expired: Vec<RequestKey> = pending
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.started) >= timeout)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            if let Some(mut request) = pending.remove(key) {
                if request.reply.is_some() {
                    let nak = request.success.reply(Command::NAK_S_GWTIMEOUT);
                    request.send_reply(nak);
                }
                warn!(
                    request = key,
                    acked = request.acknowledged.len(),
                    forwarded = request.forwarded,
                    "replication request timed out"
                );
            }
        }
        if !expired.is_empty() {
            self.stats.lock().timeouts += expired.len() as u64;
        }
        expired.len()
    }

    /// State of a tracked request. Drained requests are no longer tracked.
    pub fn state(&self, request: RequestKey) -> Option<ReplicationState> {
        self.pending.lock().get(&request).map(|r| r.state)
    }

    /// Number of tracked requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ReplicationStats {
        self.stats.lock().clone()
    }

    fn evaluate(&self, pending: &mut HashMap<RequestKey, ReplicationRequest>, key: RequestKey) {
        let Some(request) = pending.get_mut(&key) else {
            return;
        };
        if request.state == ReplicationState::Forwarding {
            return;
        }

        if request.forwarded == 0 {
            let success = request.success.clone();
            request.send_reply(success);
            self.stats.lock().local_replies += 1;
            debug!(request = key, "no replicas to forward to, local commit answers");
            pending.remove(&key);
            return;
        }

        if request.reply.is_some() && request.acknowledged.len() >= request.quorum {
            let success = request.success.clone();
            request.send_reply(success);
            request.state = ReplicationState::QuorumReached;
            self.stats.lock().quorum_replies += 1;
            debug!(request = key, acked = request.acknowledged.len(), "quorum reached");
        }

        if request.answered() >= request.forwarded {
            if request.reply.is_some() {
                // Every replica answered without a quorum; the local commit stands.
                warn!(
                    request = key,
                    acked = request.acknowledged.len(),
                    failed = request.failed.len(),
                    "quorum not reached, replying on local commit"
                );
                let success = request.success.clone();
                request.send_reply(success);
                self.stats.lock().local_replies += 1;
            }
            request.state = ReplicationState::Drained;
            info!(
                request = key,
                acked = request.acknowledged.len(),
                failed = request.failed.len(),
                elapsed_ms = request.started.elapsed().as_millis() as u64,
                "replication drained"
            );
            pending.remove(&key);
        }
    }
}

impl std::fmt::Debug for ReplicationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationCoordinator")
            .field("local", &self.local)
            .field("quorum", &self.config.quorum)
            .field("pending", &self.pending_count())
            .finish()
    }
}
