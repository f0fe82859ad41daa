//! Transports that forward publishes to replicas.
//!
//! A transport only sends. Each replica's answer comes back as a
//! [`ReplicaEvent`] on a channel owned by the coordinator, so nothing calls
//! into the coordinator from a network task.

use crate::error::{ServerError, ServerResult};
use crate::replica::ReplicaEndpoint;
use gcl_core::ServerId;
use gcl_protocol::{payload, read_packet_async, Command, Packet};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Coordinator-assigned identifier of a replication request.
pub type RequestKey = u64;

/// What a replica said about a forwarded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaOutcome {
    /// The replica committed the record.
    Acked,
    /// The replica answered with a NAK.
    Rejected(Command),
    /// The replica could not be reached or hung up.
    Failed(String),
}

/// A replica's answer to one replication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEvent {
    /// The request being answered.
    pub request: RequestKey,
    /// The answering replica.
    pub from: ServerId,
    /// The answer.
    pub outcome: ReplicaOutcome,
}

/// Channel carrying replica answers to the coordinator.
pub type EventSender = mpsc::UnboundedSender<ReplicaEvent>;

/// Sends forwarded publishes to replicas.
pub trait ReplicaTransport: Send + Sync {
    /// Starts forwarding `packet` to `target`.
    ///
    /// `Ok` means the send was started; the replica's answer arrives later
    /// on `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the send could not be started.
    fn forward(
        &self,
        target: &ReplicaEndpoint,
        request: RequestKey,
        packet: Packet,
        events: EventSender,
    ) -> ServerResult<()>;
}

/// Forwards over TCP, one connection per forwarded publish.
///
/// Each connection opens with HELLO so the replica applies the publish
/// without fanning it out again.
#[derive(Debug, Clone)]
pub struct TcpReplicaTransport {
    local: ServerId,
    handle: tokio::runtime::Handle,
    io_timeout: Duration,
}

impl TcpReplicaTransport {
    /// Creates a transport bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] outside a tokio runtime.
    pub fn new(local: ServerId, io_timeout: Duration) -> ServerResult<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ServerError::Internal(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            local,
            handle,
            io_timeout,
        })
    }

    async fn exchange(
        local: ServerId,
        addr: String,
        request: RequestKey,
        packet: Packet,
    ) -> ServerResult<Command> {
        let mut stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&payload::hello(0, &local).encode()?).await?;
        stream.write_all(&packet.encode()?).await?;
        stream.flush().await?;

        loop {
            match read_packet_async(&mut stream).await? {
                Some(reply) if reply.request_id == Some(request) => return Ok(reply.command),
                Some(other) => debug!(command = %other.command, addr, "skipping unrelated reply"),
                None => {
                    return Err(ServerError::Transport(format!(
                        "{addr} closed the connection before replying"
                    )))
                }
            }
        }
    }
}

impl ReplicaTransport for TcpReplicaTransport {
    fn forward(
        &self,
        target: &ReplicaEndpoint,
        request: RequestKey,
        packet: Packet,
        events: EventSender,
    ) -> ServerResult<()> {
        let local = self.local;
        let from = target.id;
        let addr = target.addr.clone();
        let io_timeout = self.io_timeout;

        self.handle.spawn(async move {
            let result =
                tokio::time::timeout(io_timeout, Self::exchange(local, addr.clone(), request, packet))
                    .await
                    .unwrap_or(Err(ServerError::TimedOut(io_timeout)));
            let outcome = match result {
                Ok(command) if command.is_ack() => ReplicaOutcome::Acked,
                Ok(command) => ReplicaOutcome::Rejected(command),
                Err(e) => {
                    warn!(replica = %from, addr, error = %e, "forward failed");
                    ReplicaOutcome::Failed(e.to_string())
                }
            };
            if events
                .send(ReplicaEvent {
                    request,
                    from,
                    outcome,
                })
                .is_err()
            {
                debug!(request, "coordinator gone, dropping replica answer");
            }
        });
        Ok(())
    }
}

/// Mock transport for testing.
///
/// Records every forwarded packet. Optionally answers each forward at once
/// with a fixed outcome.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<(ServerId, Packet)>>,
    unreachable: Mutex<HashSet<ServerId>>,
    auto_reply: Mutex<Option<ReplicaOutcome>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            auto_reply: Mutex::new(None),
        }
    }

    /// Answers every forward with `outcome`.
    pub fn set_auto_reply(&self, outcome: Option<ReplicaOutcome>) {
        *self.auto_reply.lock() = outcome;
    }

    /// Makes forwards to `server` fail.
    pub fn set_unreachable(&self, server: ServerId) {
        self.unreachable.lock().insert(server);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Packets forwarded so far, with their targets.
    pub fn sent(&self) -> Vec<(ServerId, Packet)> {
        self.sent.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaTransport for MockTransport {
    fn forward(
        &self,
        target: &ReplicaEndpoint,
        request: RequestKey,
        packet: Packet,
        events: EventSender,
    ) -> ServerResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ServerError::Transport("not connected".into()));
        }
        if self.unreachable.lock().contains(&target.id) {
            return Err(ServerError::Transport(format!("{target} unreachable")));
        }
        self.sent.lock().push((target.id, packet));
        if let Some(outcome) = self.auto_reply.lock().clone() {
            if events
                .send(ReplicaEvent {
                    request,
                    from: target.id,
                    outcome,
                })
                .is_err()
            {
                debug!(%target, "coordinator gone, dropping mock reply");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcl_core::Name;

    fn target(name: &str) -> ReplicaEndpoint {
        ReplicaEndpoint::new(Name::parse(name), "127.0.0.1:1")
    }

    #[test]
    fn mock_records_and_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new();
        transport.set_unreachable(Name::parse("down"));

        transport
            .forward(&target("up"), 1, Packet::new(Command::PUBLISH), tx.clone())
            .unwrap();
        let err = transport
            .forward(&target("down"), 1, Packet::new(Command::PUBLISH), tx.clone())
            .unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)));
        assert_eq!(transport.sent().len(), 1);
        assert!(rx.try_recv().is_err());

        transport.set_connected(false);
        assert!(transport
            .forward(&target("up"), 2, Packet::new(Command::PUBLISH), tx)
            .is_err());
    }

    #[test]
    fn mock_auto_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new();
        transport.set_auto_reply(Some(ReplicaOutcome::Acked));
        transport
            .forward(&target("r1"), 7, Packet::new(Command::PUBLISH), tx)
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.request, 7);
        assert_eq!(event.from, Name::parse("r1"));
        assert_eq!(event.outcome, ReplicaOutcome::Acked);
    }

    #[tokio::test]
    async fn tcp_unreachable_reports_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            TcpReplicaTransport::new(Name::parse("local"), Duration::from_secs(2)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let endpoint = ReplicaEndpoint::new(Name::parse("gone"), addr.to_string());
        transport
            .forward(&endpoint, 3, Packet::new(Command::PUBLISH).with_request_id(3), tx)
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.request, 3);
        assert!(matches!(event.outcome, ReplicaOutcome::Failed(_)));
    }
}
