//! Client side of the wire protocol.
//!
//! [`GclClient`] holds one connection and runs one request at a time:
//! each call sends a packet with a fresh request id and waits for the
//! reply carrying that id. A NAK becomes [`ServerError::Rejected`].

use crate::error::{ServerError, ServerResult};
use gcl_core::{LogIdentity, LogRecord, MetadataSet, Timestamp};
use gcl_protocol::{payload, Command, FrameBuffer, Packet};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

/// Default time to wait for a reply.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection to a log server.
#[derive(Debug)]
pub struct GclClient {
    stream: TcpStream,
    frames: FrameBuffer,
    next_request: u64,
    timeout: Duration,
}

impl GclClient {
    /// Connects to the server at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> ServerResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "connected to log server");
        Ok(Self {
            stream,
            frames: FrameBuffer::new(),
            next_request: 1,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        })
    }

    /// Sets how long a call waits for each reply.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks that the server is alive.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer with an ACK.
    pub async fn ping(&mut self) -> ServerResult<()> {
        let rid = self.request_id();
        self.call(Packet::new(Command::PING).with_request_id(rid))
            .await
            .map(drop)
    }

    /// Creates a log. The call returns once the server's replication
    /// quorum has the log.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Rejected`] with `NAK_C_CONFLICT` if the log
    /// exists.
    pub async fn create(&mut self, log: LogIdentity, metadata: &MetadataSet) -> ServerResult<()> {
        let rid = self.request_id();
        self.call(payload::create(rid, log, metadata)?).await.map(drop)
    }

    /// Opens a log and returns its last record number.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Rejected`] with `NAK_C_NOTFOUND` for an
    /// unknown log.
    pub async fn open(&mut self, log: LogIdentity, read_only: bool) -> ServerResult<u64> {
        let command = if read_only {
            Command::OPEN_RO
        } else {
            Command::OPEN_AO
        };
        let rid = self.request_id();
        let reply = self
            .call(Packet::new(command).with_request_id(rid).with_identity(log))
            .await?;
        Ok(reply.recno_u64().unwrap_or(0))
    }

    /// Closes a log on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the request.
    pub async fn close(&mut self, log: LogIdentity) -> ServerResult<()> {
        let rid = self.request_id();
        self.call(Packet::new(Command::CLOSE).with_request_id(rid).with_identity(log))
            .await
            .map(drop)
    }

    /// Appends `data` with the current time and returns its record number.
    ///
    /// # Errors
    ///
    /// See [`GclClient::publish`].
    pub async fn append(&mut self, log: LogIdentity, data: &[u8]) -> ServerResult<u64> {
        self.publish(log, &LogRecord::new(0, Timestamp::now(), data.to_vec()))
            .await
    }

    /// Publishes a record. A record number of 0 lets the server assign the
    /// next one; otherwise the record must land at exactly that number.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Rejected`] if the server refuses the record
    /// or cannot reach its replication quorum.
    pub async fn publish(&mut self, log: LogIdentity, record: &LogRecord) -> ServerResult<u64> {
        let rid = self.request_id();
        let mut packet = Packet::new(Command::PUBLISH)
            .with_request_id(rid)
            .with_identity(log)
            .with_timestamp(record.timestamp)
            .with_payload(record.payload.clone());
        if record.recno != 0 {
            packet = packet.with_recno(record.recno)?;
        }
        if let Some(sig) = &record.signature {
            packet = packet.with_signature(sig.clone());
        }
        let reply = self.call(packet).await?;
        reply
            .recno_u64()
            .ok_or_else(|| ServerError::InvalidRequest("publish ACK without recno".into()))
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Rejected`] with `NAK_C_NOTFOUND` if there is
    /// no such record.
    pub async fn read(&mut self, log: LogIdentity, recno: u64) -> ServerResult<LogRecord> {
        let rid = self.request_id();
        let reply = self.call(payload::read(rid, log, recno)?).await?;
        Ok(reply.to_record())
    }

    /// Reads up to `count` records from `from`; a `count` of 0 reads to the
    /// end of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the request.
    pub async fn multiread(
        &mut self,
        log: LogIdentity,
        from: u64,
        count: u32,
    ) -> ServerResult<Vec<LogRecord>> {
        let rid = self.request_id();
        self.send(&payload::ranged(Command::MULTIREAD, rid, log, from, count)?)
            .await?;
        let mut records = Vec::new();
        loop {
            let reply = self.reply_to(rid).await?;
            match reply.command {
                Command::ACK_CONTENT => records.push(reply.to_record()),
                Command::ACK_SUCCESS => {
                    let sent = payload::decode_count(&reply.payload)?;
                    trace!(sent, received = records.len(), "multiread finished");
                    return Ok(records);
                }
                command if command.is_nak() => return Err(ServerError::from_nak(&reply)),
                other => {
                    return Err(ServerError::InvalidRequest(format!(
                        "unexpected {other} in multiread"
                    )))
                }
            }
        }
    }

    /// Fetches a log's metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is unknown or the metadata is malformed.
    pub async fn metadata(&mut self, log: LogIdentity) -> ServerResult<MetadataSet> {
        let rid = self.request_id();
        let reply = self
            .call(Packet::new(Command::GETMETADATA).with_request_id(rid).with_identity(log))
            .await?;
        Ok(payload::decode_metadata(&reply.payload)?)
    }

    /// Subscribes to `count` records from `from` (0 for no limit). The
    /// connection is handed to the returned stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the subscription.
    pub async fn subscribe(
        mut self,
        log: LogIdentity,
        from: u64,
        count: u32,
    ) -> ServerResult<RecordStream> {
        let rid = self.request_id();
        let ack = self
            .call(payload::ranged(Command::SUBSCRIBE, rid, log, from, count)?)
            .await?;
        trace!(command = %ack.command, log = %log, "subscription accepted");
        Ok(RecordStream {
            client: self,
            request_id: rid,
            finished: false,
        })
    }

    fn request_id(&mut self) -> u64 {
        let rid = self.next_request;
        self.next_request = self.next_request.wrapping_add(1).max(1);
        rid
    }

    /// Sends `packet` and returns its ACK.
    async fn call(&mut self, packet: Packet) -> ServerResult<Packet> {
        let rid = packet.request_id.unwrap_or(0);
        self.send(&packet).await?;
        let reply = self.reply_to(rid).await?;
        if reply.command.is_nak() {
            return Err(ServerError::from_nak(&reply));
        }
        Ok(reply)
    }

    async fn send(&mut self, packet: &Packet) -> ServerResult<()> {
        trace!(command = %packet.command, rid = ?packet.request_id, "sending request");
        self.stream.write_all(&packet.encode()?).await?;
        Ok(())
    }

    /// Next reply carrying `rid`. Replies to other requests are dropped.
    async fn reply_to(&mut self, rid: u64) -> ServerResult<Packet> {
        loop {
            let packet = self.next_packet().await?;
            let unsolicited_nak = packet.request_id.is_none() && packet.command.is_nak();
            if packet.request_id == Some(rid) || unsolicited_nak {
                return Ok(packet);
            }
            debug!(command = %packet.command, rid = ?packet.request_id, "skipping unrelated reply");
        }
    }

    async fn next_packet(&mut self) -> ServerResult<Packet> {
        let timeout = self.timeout;
        loop {
            if let Some(packet) = self.frames.next_packet()? {
                return Ok(packet);
            }
            let read = tokio::time::timeout(timeout, self.stream.read_buf(self.frames.buffer_mut()))
                .await
                .map_err(|_| ServerError::Transport(format!("no reply within {timeout:?}")))??;
            if read == 0 {
                return Err(ServerError::Transport("server closed the connection".into()));
            }
        }
    }
}

/// Records delivered by a subscription.
#[derive(Debug)]
pub struct RecordStream {
    client: GclClient,
    request_id: u64,
    finished: bool,
}

impl RecordStream {
    /// Waits for the next record. Returns `None` once the subscription
    /// ends, either because its count ran out or the log was closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the server reports a failure or the connection
    /// drops.
    pub async fn next(&mut self) -> ServerResult<Option<LogRecord>> {
        if self.finished {
            return Ok(None);
        }
        let packet = self.client.reply_to(self.request_id).await?;
        match packet.command {
            Command::ACK_CONTENT => Ok(Some(packet.to_record())),
            Command::ACK_DELETED => {
                self.finished = true;
                Ok(None)
            }
            command if command.is_nak() => {
                self.finished = true;
                Err(ServerError::from_nak(&packet))
            }
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected {other} in subscription"
            ))),
        }
    }

    /// Sets how long [`RecordStream::next`] waits for a record.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.client.timeout = timeout;
    }
}
