//! TCP log server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{error_reply, stream_packet, HandlerContext, HandlerReply, RequestHandler, Session};
use crate::registry::LogRegistry;
use crate::replication::ReplicationCoordinator;
use crate::transport::{ReplicaEvent, ReplicaTransport, TcpReplicaTransport};
use gcl_core::{Subscription, SubscriptionEvent};
use gcl_protocol::{FrameBuffer, Packet};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, info, warn};

/// Replies queued per connection before the reader waits.
const OUTBOUND_QUEUE: usize = 256;

/// How often a streaming subscription checks for a departed client.
const STREAM_POLL: Duration = Duration::from_millis(500);

/// The log server.
///
/// One server instance serves one listener; [`GclServer::shutdown`] stops
/// it and closes every open log.
pub struct GclServer {
    config: ServerConfig,
    handler: Arc<RequestHandler>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ReplicaEvent>>>,
    shutdown: Notify,
    running: AtomicBool,
}

impl GclServer {
    /// Creates a file-backed server that replicates over TCP.
    ///
    /// # Errors
    ///
    /// Returns an error outside a tokio runtime.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let transport = TcpReplicaTransport::new(config.local_name, config.replication.ack_timeout)?;
        let registry = Arc::new(LogRegistry::new(config.store.clone()));
        Ok(Self::with_parts(config, registry, Arc::new(transport)))
    }

    /// Creates a server from its parts.
    pub fn with_parts(
        config: ServerConfig,
        registry: Arc<LogRegistry>,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Self {
        let (coordinator, events) =
            ReplicationCoordinator::new(config.local_name, config.replication.clone(), transport);
        let context = HandlerContext::new(config.clone(), registry, Arc::new(coordinator));
        Self::with_context(context, events)
    }

    /// Creates a server around a prepared handler context.
    pub fn with_context(
        context: HandlerContext,
        events: mpsc::UnboundedReceiver<ReplicaEvent>,
    ) -> Self {
        Self {
            config: context.config.clone(),
            handler: Arc::new(RequestHandler::new(Arc::new(context))),
            events: Mutex::new(Some(events)),
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The request handler.
    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// Open logs.
    pub fn registry(&self) -> &Arc<LogRegistry> {
        &self.handler.context().registry
    }

    /// The replication coordinator.
    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator> {
        &self.handler.context().coordinator
    }

    /// Returns true while [`GclServer::serve`] is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        Ok(TcpListener::bind(self.config.bind_addr).await?)
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    ///
    /// See [`GclServer::serve`].
    pub async fn run(&self) -> ServerResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves connections from `listener` until [`GclServer::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the server is already running
    /// or has already served.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::Internal("server already running".into()));
        }
        let Some(events) = self.events.lock().take() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(ServerError::Internal("server cannot be restarted".into()));
        };

        let coordinator = Arc::clone(self.coordinator());
        let event_task = tokio::spawn(Arc::clone(&coordinator).run(events));
        let reaper = tokio::spawn(reap(
            Arc::clone(&coordinator),
            self.config.replication.reap_interval,
        ));
        let limiter = Arc::new(Semaphore::new(self.config.max_connections));

        info!(
            addr = %listener.local_addr()?,
            server = %self.config.local_name,
            quorum = self.config.replication.quorum,
            "log server listening"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                            warn!(%peer, "connection limit reached, refusing");
                            continue;
                        };
                        let handler = Arc::clone(&self.handler);
                        let request_timeout = self.config.request_timeout;
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = handle_connection(stream, peer, handler, request_timeout).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
                () = self.shutdown.notified() => {
                    info!("log server shutting down");
                    break;
                }
            }
        }

        reaper.abort();
        event_task.abort();
        self.registry().close_all();
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stops the accept loop. Takes effect even if called before
    /// [`GclServer::serve`] starts waiting.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

async fn reap(coordinator: Arc<ReplicationCoordinator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    loop {
        ticker.tick().await;
        let expired = coordinator.expire(Instant::now());
        if expired > 0 {
            debug!(expired, "reaped replication requests");
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<RequestHandler>,
    request_timeout: Duration,
) -> ServerResult<()> {
    stream.set_nodelay(true)?;
    debug!(%peer, "connection accepted");
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(write_replies(writer, rx));

    let mut frames = FrameBuffer::new();
    let mut session = Session::new();
    let result = loop {
        match frames.next_packet() {
            Ok(Some(packet)) => {
                let (reply, packet) = match dispatch(&handler, packet, &mut session).await {
                    Ok(done) => done,
                    Err(e) => break Err(e),
                };
                if !deliver(reply, packet, &tx, request_timeout).await {
                    break Ok(());
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%peer, error = %e, "undecodable packet, closing connection");
                let err = ServerError::from(e);
                let nak = Packet::new(err.nak_code()).with_payload(err.to_string().into_bytes());
                if tx.send(nak).await.is_err() {
                    debug!(%peer, "writer gone before decode error reply");
                }
                break Err(err);
            }
        }
        match reader.read_buf(frames.buffer_mut()).await {
            Ok(0) => {
                if frames.buffered() > 0 {
                    debug!(%peer, buffered = frames.buffered(), "connection closed mid-packet");
                }
                break Ok(());
            }
            Ok(_) => {}
            Err(e) => break Err(e.into()),
        }
    };

    drop(tx);
    if let Err(e) = writer_task.await {
        debug!(%peer, error = %e, "reply writer task failed");
    }
    debug!(%peer, "connection closed");
    result
}

/// Runs the handler on the blocking pool, since store reads and appends
/// do file I/O and may sync.
async fn dispatch(
    handler: &Arc<RequestHandler>,
    packet: Packet,
    session: &mut Session,
) -> ServerResult<(HandlerReply, Packet)> {
    let handler = Arc::clone(handler);
    let mut owned = std::mem::take(session);
    let (reply, packet, owned) = tokio::task::spawn_blocking(move || {
        let reply = handler.handle(&packet, &mut owned);
        (reply, packet, owned)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("request handler failed: {e}")))?;
    *session = owned;
    Ok((reply, packet))
}

/// Queues `reply` for the writer. Returns false once the writer is gone.
async fn deliver(
    reply: HandlerReply,
    request: Packet,
    tx: &mpsc::Sender<Packet>,
    request_timeout: Duration,
) -> bool {
    match reply {
        HandlerReply::None => true,
        HandlerReply::Immediate(packet) => tx.send(packet).await.is_ok(),
        HandlerReply::Batch(packets) => {
            for packet in packets {
                if tx.send(packet).await.is_err() {
                    return false;
                }
            }
            true
        }
        HandlerReply::Deferred(pending) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                let reply = match tokio::time::timeout(request_timeout, pending).await {
                    Ok(Ok(packet)) => packet,
                    Ok(Err(_)) => error_reply(
                        &request,
                        &ServerError::Internal("replication request dropped".into()),
                    ),
                    Err(_) => error_reply(&request, &ServerError::TimedOut(request_timeout)),
                };
                if let Err(e) = tx.send(reply).await {
                    debug!(command = %e.0.command, "connection closed before deferred reply");
                }
            });
            true
        }
        HandlerReply::Stream {
            ack,
            subscription,
            request,
        } => {
            if tx.send(ack).await.is_err() {
                return false;
            }
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || stream_subscription(subscription, &request, &tx));
            true
        }
    }
}

fn stream_subscription(mut subscription: Subscription, request: &Packet, tx: &mpsc::Sender<Packet>) {
    loop {
        if tx.is_closed() {
            debug!(position = subscription.position(), "subscriber went away");
            return;
        }
        let (packet, last) = match subscription.next_timeout(STREAM_POLL) {
            Ok(None) => continue,
            Ok(Some(event)) => {
                let last = matches!(event, SubscriptionEvent::End);
                let packet = stream_packet(request, event).unwrap_or_else(|e| error_reply(request, &e));
                let last = last || packet.command.is_nak();
                (packet, last)
            }
            Err(e) => (error_reply(request, &e.into()), true),
        };
        if tx.blocking_send(packet).is_err() || last {
            return;
        }
    }
}

async fn write_replies(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Packet>) {
    while let Some(packet) = rx.recv().await {
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(command = %packet.command, error = %e, "cannot encode reply");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            debug!(error = %e, "write failed");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "shutdown of reply stream failed");
    }
}
