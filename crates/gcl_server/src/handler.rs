//! Request handling.
//!
//! Turns one decoded request into its reply. Network I/O is left to the
//! caller: replicated writes come back as a [`PendingReply`] and
//! subscriptions as a [`Subscription`] to be drained off the event loop.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::LogRegistry;
use crate::replication::{PendingReply, ReplicationCoordinator};
use gcl_core::{
    DigestVerifier, LogIdentity, LogRecord, RecordVerifier, ServerId, Subscription,
    SubscriptionEvent,
};
use gcl_protocol::{payload, Command, CommandClass, Packet, ProtocolError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Open logs.
    pub registry: Arc<LogRegistry>,
    /// Replication of writes.
    pub coordinator: Arc<ReplicationCoordinator>,
    verifier: Arc<dyn RecordVerifier>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        registry: Arc<LogRegistry>,
        coordinator: Arc<ReplicationCoordinator>,
    ) -> Self {
        Self {
            config,
            registry,
            coordinator,
            verifier: Arc::new(DigestVerifier),
        }
    }

    /// Replaces the signature verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn RecordVerifier>) -> Self {
        self.verifier = verifier;
        self
    }
}

/// Per-connection state.
#[derive(Debug, Default, Clone)]
pub struct Session {
    peer: Option<ServerId>,
}

impl Session {
    /// Creates a session for a fresh connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The server that introduced itself with HELLO, if any.
    #[must_use]
    pub fn peer(&self) -> Option<&ServerId> {
        self.peer.as_ref()
    }

    /// Returns true if the connection comes from another log server.
    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.peer.is_some()
    }
}

/// What to send back for a request.
#[derive(Debug)]
pub enum HandlerReply {
    /// Nothing.
    None,
    /// One packet, now.
    Immediate(Packet),
    /// Several packets, now, in order.
    Batch(Vec<Packet>),
    /// One packet once replication settles.
    Deferred(PendingReply),
    /// An acknowledgment followed by the subscription's records.
    Stream {
        /// Sent first.
        ack: Packet,
        /// Source of the records.
        subscription: Subscription,
        /// The SUBSCRIBE request, for reply correlation.
        request: Packet,
    },
}

/// Handler for log requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles one request. Failures become NAK replies.
    pub fn handle(&self, packet: &Packet, session: &mut Session) -> HandlerReply {
        match self.dispatch(packet, session) {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_server_error() {
                    warn!(command = %packet.command, error = %e, "request failed");
                } else {
                    debug!(command = %packet.command, error = %e, "request rejected");
                }
                HandlerReply::Immediate(error_reply(packet, &e))
            }
        }
    }

    fn dispatch(&self, packet: &Packet, session: &mut Session) -> ServerResult<HandlerReply> {
        match packet.command {
            Command::KEEPALIVE => Ok(HandlerReply::None),
            Command::PING => Ok(HandlerReply::Immediate(packet.reply(Command::ACK_SUCCESS))),
            Command::HELLO => self.handle_hello(packet, session),
            Command::CREATE => self.handle_create(packet, session),
            Command::OPEN_AO | Command::OPEN_RO => self.handle_open(packet),
            Command::CLOSE => {
                packet.require_identity()?;
                Ok(HandlerReply::Immediate(packet.reply(Command::ACK_SUCCESS)))
            }
            Command::READ => self.handle_read(packet),
            Command::MULTIREAD => self.handle_multiread(packet),
            Command::PUBLISH => self.handle_publish(packet, session),
            Command::SUBSCRIBE => self.handle_subscribe(packet),
            Command::GETMETADATA => self.handle_get_metadata(packet),
            command if command.is_response() => {
                debug!(%command, "ignoring unsolicited response");
                Ok(HandlerReply::None)
            }
            command if command.class() == CommandClass::Blind => Ok(HandlerReply::None),
            command => Err(ServerError::NotImplemented(command)),
        }
    }

    fn handle_hello(&self, packet: &Packet, session: &mut Session) -> ServerResult<HandlerReply> {
        let peer = payload::decode_hello(&packet.payload)?;
        info!(peer = %peer, "replica connected");
        session.peer = Some(peer);
        let local = self.context.config.local_name;
        Ok(HandlerReply::Immediate(
            packet
                .reply(Command::ACK_SUCCESS)
                .with_payload(local.as_bytes().to_vec()),
        ))
    }

    fn handle_create(&self, packet: &Packet, session: &Session) -> ServerResult<HandlerReply> {
        let identity = packet.require_identity()?;
        let metadata = payload::decode_metadata(&packet.payload)?;
        let handle = self.context.registry.create(identity, &metadata)?;
        info!(log = %identity, entries = metadata.len(), "log created");

        let ack = packet.reply(Command::ACK_CREATED);
        if session.is_replica() {
            return Ok(HandlerReply::Immediate(ack));
        }
        let replicas = handle.replica_set(&self.context.config.replication.default_replicas);
        let forward = Packet::new(Command::CREATE)
            .with_identity(identity)
            .with_payload(packet.payload.clone());
        let pending = self.context.coordinator.replicate(&replicas, forward, ack)?;
        Ok(HandlerReply::Deferred(pending))
    }

    fn handle_open(&self, packet: &Packet) -> ServerResult<HandlerReply> {
        let identity = packet.require_identity()?;
        let handle = self.context.registry.open(identity)?;
        let last = handle.store().last_recno();
        Ok(HandlerReply::Immediate(
            packet.reply(Command::ACK_SUCCESS).with_recno(last)?,
        ))
    }

    fn handle_read(&self, packet: &Packet) -> ServerResult<HandlerReply> {
        let identity = packet.require_identity()?;
        let recno = packet
            .recno_u64()
            .ok_or(ProtocolError::MissingField("recno"))?;
        let handle = self.context.registry.open(identity)?;
        let record = handle.store().read(recno)?;
        Ok(HandlerReply::Immediate(content_reply(packet, identity, &record)?))
    }

    fn handle_multiread(&self, packet: &Packet) -> ServerResult<HandlerReply> {
        let identity = packet.require_identity()?;
        let from = packet.recno_u64().unwrap_or(1);
        let count = payload::decode_count(&packet.payload)?;
        let handle = self.context.registry.open(identity)?;
        let records = handle.store().read_range(from, u64::from(count))?;

        let mut replies = Vec::with_capacity(records.len() + 1);
        for record in &records {
            replies.push(content_reply(packet, identity, record)?);
        }
        let sent = u32::try_from(records.len()).unwrap_or(u32::MAX);
        replies.push(
            packet
                .reply(Command::ACK_SUCCESS)
                .with_payload(payload::encode_count(sent)),
        );
        Ok(HandlerReply::Batch(replies))
    }

    fn handle_publish(&self, packet: &Packet, session: &Session) -> ServerResult<HandlerReply> {
        let identity = packet.require_identity()?;
        let handle = self.context.registry.open(identity)?;
        let store = handle.store();

        let mut record = packet.to_record();
        if record.recno == 0 {
            record.recno = store.last_recno() + 1;
        }
        let policy = self.context.config.signature_policy;
        if !policy.accepts(&*self.context.verifier, &identity, &record) {
            return Err(ServerError::NotAcceptable(format!(
                "signature rejected for record {}",
                record.recno
            )));
        }

        // A signature covers the recno, so signed records must land exactly there.
        let pinned = packet
            .recno_u64()
            .or_else(|| record.signature.as_ref().map(|_| record.recno));
        record.recno = match pinned {
            Some(recno) => store.append_at(recno, &record.payload, record.timestamp)?,
            None => store.append(&record.payload, record.timestamp)?,
        };
        debug!(log = %identity, recno = record.recno, replica = session.is_replica(), "published");

        let ack = packet
            .reply(Command::ACK_CREATED)
            .with_recno(record.recno)?
            .with_timestamp(record.timestamp);
        if session.is_replica() {
            return Ok(HandlerReply::Immediate(ack));
        }

        let replicas = handle.replica_set(&self.context.config.replication.default_replicas);
        let forward = Packet::from_record(Command::PUBLISH, identity, &record)?;
        let pending = self.context.coordinator.replicate(&replicas, forward, ack)?;
        Ok(HandlerReply::Deferred(pending))
    }

    fn handle_subscribe(&self, packet: &Packet) -> ServerResult<HandlerReply> {
        let identity = packet.require_identity()?;
        let from = packet.recno_u64().unwrap_or(1);
        let count = payload::decode_count(&packet.payload)?;
        let handle = self.context.registry.open(identity)?;
        let subscription = handle.store().subscribe(from).with_limit(u64::from(count));
        debug!(log = %identity, from, count, "subscription started");
        Ok(HandlerReply::Stream {
            ack: packet.reply(Command::ACK_SUCCESS),
            subscription,
            request: packet.clone(),
        })
    }

    fn handle_get_metadata(&self, packet: &Packet) -> ServerResult<HandlerReply> {
        let identity = packet.require_identity()?;
        let handle = self.context.registry.open(identity)?;
        let encoded = payload::encode_metadata(handle.store().metadata())?;
        Ok(HandlerReply::Immediate(
            packet.reply(Command::ACK_CONTENT).with_payload(encoded),
        ))
    }
}

/// The NAK answering `request` with `error`; the message is the payload.
pub fn error_reply(request: &Packet, error: &ServerError) -> Packet {
    request
        .reply(error.nak_code())
        .with_payload(error.to_string().into_bytes())
}

/// The packet carrying one subscription event back to the subscriber:
/// ACK_CONTENT per record, ACK_DELETED at the end.
///
/// # Errors
///
/// Returns [`ProtocolError::RecnoOverflow`] for a record number beyond the
/// wire's range.
pub fn stream_packet(request: &Packet, event: SubscriptionEvent) -> ServerResult<Packet> {
    match event {
        SubscriptionEvent::Record(record) => {
            let identity = request.require_identity()?;
            content_reply(request, identity, &record)
        }
        SubscriptionEvent::End => Ok(request.reply(Command::ACK_DELETED)),
    }
}

fn content_reply(request: &Packet, identity: LogIdentity, record: &LogRecord) -> ServerResult<Packet> {
    let mut reply = Packet::from_record(Command::ACK_CONTENT, identity, record)?;
    reply.request_id = request.request_id;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::replica::ReplicaEndpoint;
    use crate::transport::{MockTransport, ReplicaOutcome};
    use gcl_core::{metadata::ids, MetadataSet, Name, Sha256Digest, SignaturePolicy, StoreConfig, Timestamp};

    struct Fixture {
        handler: RequestHandler,
        transport: Arc<MockTransport>,
        coordinator: Arc<ReplicationCoordinator>,
    }

    fn fixture(replicas: &[&str], policy: SignaturePolicy) -> Fixture {
        let local = Name::parse("local");
        let members = replicas
            .iter()
            .map(|n| ReplicaEndpoint::new(Name::parse(n), "127.0.0.1:1"))
            .collect();
        let config = ServerConfig::default()
            .with_local_name(local)
            .with_signature_policy(policy)
            .with_replication(ReplicationConfig::default().with_replicas(members));
        let transport = Arc::new(MockTransport::new());
        let (coordinator, _events) =
            ReplicationCoordinator::new(local, config.replication.clone(), transport.clone());
        let coordinator = Arc::new(coordinator);
        let registry = Arc::new(LogRegistry::in_memory(StoreConfig::default()));
        let context = HandlerContext::new(config, registry, coordinator.clone());
        Fixture {
            handler: RequestHandler::new(Arc::new(context)),
            transport,
            coordinator,
        }
    }

    fn immediate(reply: HandlerReply) -> Packet {
        match reply {
            HandlerReply::Immediate(packet) => packet,
            other => panic!("expected immediate reply, got {other:?}"),
        }
    }

    fn deferred(reply: HandlerReply) -> PendingReply {
        match reply {
            HandlerReply::Deferred(rx) => rx,
            other => panic!("expected deferred reply, got {other:?}"),
        }
    }

    fn create(fx: &Fixture, name: &str) -> LogIdentity {
        let id = Name::parse(name);
        let packet = payload::create(1, id, &MetadataSet::new()).unwrap();
        let mut rx = deferred(fx.handler.handle(&packet, &mut Session::new()));
        assert_eq!(rx.try_recv().unwrap().command, Command::ACK_CREATED);
        id
    }

    fn publish(id: LogIdentity, body: &[u8]) -> Packet {
        Packet::new(Command::PUBLISH)
            .with_request_id(5)
            .with_identity(id)
            .with_payload(body.to_vec())
    }

    #[test]
    fn ping_and_keepalive() {
        let fx = fixture(&["local"], SignaturePolicy::Ignore);
        let mut session = Session::new();
        let pong = immediate(fx.handler.handle(&Packet::new(Command::PING).with_request_id(3), &mut session));
        assert_eq!(pong.command, Command::ACK_SUCCESS);
        assert_eq!(pong.request_id, Some(3));
        assert!(matches!(
            fx.handler.handle(&Packet::new(Command::KEEPALIVE), &mut session),
            HandlerReply::None
        ));
    }

    #[test]
    fn hello_world_over_handler() {
        let fx = fixture(&["local"], SignaturePolicy::Ignore);
        let id = create(&fx, "hw");
        let mut session = Session::new();

        let mut rx = deferred(fx.handler.handle(&publish(id, b"hello"), &mut session));
        let ack = rx.try_recv().unwrap();
        assert_eq!(ack.command, Command::ACK_CREATED);
        assert_eq!(ack.recno, Some(1));
        let mut rx = deferred(fx.handler.handle(&publish(id, b"world"), &mut session));
        assert_eq!(rx.try_recv().unwrap().recno, Some(2));

        let read = payload::read(9, id, 1).unwrap();
        let reply = immediate(fx.handler.handle(&read, &mut session));
        assert_eq!(reply.command, Command::ACK_CONTENT);
        assert_eq!(reply.request_id, Some(9));
        assert_eq!(&reply.payload[..], b"hello");

        let missing = payload::read(10, id, 3).unwrap();
        let reply = immediate(fx.handler.handle(&missing, &mut session));
        assert_eq!(reply.command, Command::NAK_C_NOTFOUND);
    }

    #[test]
    fn create_conflict_and_missing_log() {
        let fx = fixture(&["local"], SignaturePolicy::Ignore);
        let id = create(&fx, "dup");
        let again = payload::create(2, id, &MetadataSet::new()).unwrap();
        let reply = immediate(fx.handler.handle(&again, &mut Session::new()));
        assert_eq!(reply.command, Command::NAK_C_CONFLICT);

        let open = Packet::new(Command::OPEN_RO).with_identity(Name::parse("nope"));
        let reply = immediate(fx.handler.handle(&open, &mut Session::new()));
        assert_eq!(reply.command, Command::NAK_C_NOTFOUND);
    }

    #[test]
    fn explicit_recno_must_be_next() {
        let fx = fixture(&["local"], SignaturePolicy::Ignore);
        let id = create(&fx, "seq");
        let bad = publish(id, b"x").with_recno(4).unwrap();
        let reply = immediate(fx.handler.handle(&bad, &mut Session::new()));
        assert_eq!(reply.command, Command::NAK_C_FORBIDDEN);

        let good = publish(id, b"x").with_recno(1).unwrap();
        let mut rx = deferred(fx.handler.handle(&good, &mut Session::new()));
        assert_eq!(rx.try_recv().unwrap().recno, Some(1));
    }

    #[test]
    fn signature_policy_enforced() {
        let fx = fixture(&["local"], SignaturePolicy::Required);
        let id = create(&fx, "signed");
        let reply = immediate(fx.handler.handle(&publish(id, b"data"), &mut Session::new()));
        assert_eq!(reply.command, Command::NAK_C_NOTACCEPTABLE);

        let signed = publish(id, b"data").with_signature(Sha256Digest::of_record(1, b"data").to_vec());
        let mut rx = deferred(fx.handler.handle(&signed, &mut Session::new()));
        assert_eq!(rx.try_recv().unwrap().recno, Some(1));
    }

    #[test]
    fn publish_forwards_to_other_replicas() {
        let fx = fixture(&["local", "r1", "r2"], SignaturePolicy::Ignore);
        fx.transport.set_auto_reply(None);
        let id = Name::parse("fan");
        fx.handler
            .context()
            .registry
            .create(id, &MetadataSet::new())
            .unwrap();

        let mut rx = deferred(fx.handler.handle(&publish(id, b"p"), &mut Session::new()));
        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 2);
        let forwarded = &sent[0].1;
        assert_eq!(forwarded.command, Command::PUBLISH);
        assert_eq!(forwarded.recno, Some(1));
        assert_eq!(&forwarded.payload[..], b"p");
        assert!(rx.try_recv().is_err());

        fx.coordinator
            .handle_event(crate::transport::ReplicaEvent {
                request: forwarded.request_id.unwrap(),
                from: Name::parse("r2"),
                outcome: ReplicaOutcome::Acked,
            });
        let ack = rx.try_recv().unwrap();
        assert_eq!(ack.command, Command::ACK_CREATED);
        assert_eq!(ack.request_id, Some(5));
    }

    #[test]
    fn replica_publish_is_not_forwarded() {
        let fx = fixture(&["local", "r1"], SignaturePolicy::Ignore);
        let id = Name::parse("peer");
        fx.handler
            .context()
            .registry
            .create(id, &MetadataSet::new())
            .unwrap();

        let mut session = Session::new();
        let hello = payload::hello(0, &Name::parse("r1"));
        let reply = immediate(fx.handler.handle(&hello, &mut session));
        assert_eq!(&reply.payload[..], Name::parse("local").as_bytes());
        assert!(session.is_replica());

        let packet = publish(id, b"copy").with_recno(1).unwrap();
        let ack = immediate(fx.handler.handle(&packet, &mut session));
        assert_eq!(ack.command, Command::ACK_CREATED);
        assert!(fx.transport.sent().is_empty());
    }

    #[test]
    fn no_replicas_is_unavailable() {
        let fx = fixture(&[], SignaturePolicy::Ignore);
        let id = Name::parse("lonely");
        fx.handler
            .context()
            .registry
            .create(id, &MetadataSet::new())
            .unwrap();
        let reply = immediate(fx.handler.handle(&publish(id, b"x"), &mut Session::new()));
        assert_eq!(reply.command, Command::NAK_S_SVCUNAVAIL);
    }

    #[test]
    fn multiread_and_metadata() {
        let fx = fixture(&["local"], SignaturePolicy::Ignore);
        let id = Name::parse("multi");
        let mut meta = MetadataSet::new();
        meta.add(ids::XID, b"external").unwrap();
        let handle = fx.handler.context().registry.create(id, &meta).unwrap();
        for body in [&b"a"[..], b"b", b"c"] {
            handle.store().append(body, Timestamp::now()).unwrap();
        }

        let request = payload::ranged(Command::MULTIREAD, 4, id, 2, 0).unwrap();
        let replies = match fx.handler.handle(&request, &mut Session::new()) {
            HandlerReply::Batch(replies) => replies,
            other => panic!("expected batch, got {other:?}"),
        };
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].recno, Some(2));
        assert_eq!(replies[1].recno, Some(3));
        assert_eq!(replies[2].command, Command::ACK_SUCCESS);
        assert_eq!(payload::decode_count(&replies[2].payload).unwrap(), 2);

        let request = Packet::new(Command::GETMETADATA).with_identity(id);
        let reply = immediate(fx.handler.handle(&request, &mut Session::new()));
        let decoded = payload::decode_metadata(&reply.payload).unwrap();
        assert_eq!(decoded.find(ids::XID), Some(&b"external"[..]));
    }

    #[test]
    fn subscribe_streams_until_limit() {
        let fx = fixture(&["local"], SignaturePolicy::Ignore);
        let id = Name::parse("sub");
        let handle = fx.handler.context().registry.create(id, &MetadataSet::new()).unwrap();
        handle.store().append(b"one", Timestamp::now()).unwrap();
        handle.store().append(b"two", Timestamp::now()).unwrap();

        let request = payload::ranged(Command::SUBSCRIBE, 8, id, 1, 2).unwrap();
        let (ack, mut subscription, request) = match fx.handler.handle(&request, &mut Session::new()) {
            HandlerReply::Stream {
                ack,
                subscription,
                request,
            } => (ack, subscription, request),
            other => panic!("expected stream, got {other:?}"),
        };
        assert_eq!(ack.command, Command::ACK_SUCCESS);

        let first = stream_packet(&request, subscription.next_event().unwrap()).unwrap();
        assert_eq!(first.command, Command::ACK_CONTENT);
        assert_eq!(&first.payload[..], b"one");
        let second = stream_packet(&request, subscription.next_event().unwrap()).unwrap();
        assert_eq!(second.recno, Some(2));
        let end = stream_packet(&request, subscription.next_event().unwrap()).unwrap();
        assert_eq!(end.command, Command::ACK_DELETED);
        assert_eq!(end.request_id, Some(8));
    }

    #[test]
    fn unknown_request_not_implemented() {
        let fx = fixture(&["local"], SignaturePolicy::Ignore);
        let reply = immediate(fx.handler.handle(&Packet::new(Command(100)), &mut Session::new()));
        assert_eq!(reply.command, Command::NAK_S_NOTIMPL);
        assert!(matches!(
            fx.handler.handle(&Packet::new(Command(10)), &mut Session::new()),
            HandlerReply::None
        ));
    }
}
