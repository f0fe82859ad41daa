//! Packet layout and codec.
//!
//! ```text
//! version(1) | command(1) | flags(1) | reserved(1) | data_length(4)
//! [request_id(8)]            if HAS_RID
//! [log_identity(32)]         if HAS_ID
//! [recno(4)]                 if HAS_RECNO
//! [timestamp(16)]            if HAS_TS
//! [sig_length(2)]            if HAS_SIG
//! data(data_length)
//! [signature(sig_length)]    if HAS_SIG
//! ```
//!
//! All integers are in network byte order.

use crate::command::Command;
use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use gcl_core::{LogIdentity, LogRecord, Name, Timestamp, NAME_LEN, TIMESTAMP_SIZE};

/// Protocol version written by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Oldest protocol version accepted.
pub const MIN_PROTOCOL_VERSION: u8 = 1;

/// Size of the fixed prefix.
pub const FIXED_HEADER_SIZE: usize = 8;

/// Largest signature that fits the 2-byte length field.
pub const MAX_SIGNATURE_LEN: usize = u16::MAX as usize;

/// Flag bits selecting optional fields.
pub mod flags {
    /// A request id follows the fixed prefix.
    pub const HAS_RID: u8 = 0x01;
    /// A 32-byte log identity follows.
    pub const HAS_ID: u8 = 0x02;
    /// A 4-byte record number follows.
    pub const HAS_RECNO: u8 = 0x04;
    /// A 16-byte timestamp follows.
    pub const HAS_TS: u8 = 0x08;
    /// A signature trails the data.
    pub const HAS_SIG: u8 = 0x10;
}

/// Length of the optional section selected by `flags`, excluding the
/// signature bytes that trail the data.
#[must_use]
pub fn optional_len(flag_bits: u8) -> usize {
    let mut len = 0;
    if flag_bits & flags::HAS_RID != 0 {
        len += 8;
    }
    if flag_bits & flags::HAS_ID != 0 {
        len += NAME_LEN;
    }
    if flag_bits & flags::HAS_RECNO != 0 {
        len += 4;
    }
    if flag_bits & flags::HAS_TS != 0 {
        len += TIMESTAMP_SIZE;
    }
    if flag_bits & flags::HAS_SIG != 0 {
        len += 2;
    }
    len
}

/// One request, acknowledgment or negative acknowledgment.
///
/// Presence of each optional field determines its flag bit on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Protocol version.
    pub version: u8,
    /// Command code.
    pub command: Command,
    /// Correlates a response with its request.
    pub request_id: Option<u64>,
    /// Target log.
    pub identity: Option<LogIdentity>,
    /// Record number.
    pub recno: Option<u32>,
    /// Record timestamp.
    pub timestamp: Option<Timestamp>,
    /// Command payload.
    pub payload: Bytes,
    /// Record signature.
    pub signature: Option<Bytes>,
}

/// Result of decoding from a possibly incomplete buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A full packet and the number of bytes it occupied.
    Packet {
        /// The decoded packet.
        packet: Packet,
        /// Bytes consumed from the input.
        consumed: usize,
    },
    /// The buffer holds only part of a packet.
    NeedMoreData {
        /// Bytes available.
        have: usize,
        /// Bytes needed, or a lower bound while the prefix is incomplete.
        need: usize,
    },
}

impl Packet {
    /// Creates a packet with no optional fields and an empty payload.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
            request_id: None,
            identity: None,
            recno: None,
            timestamp: None,
            payload: Bytes::new(),
            signature: None,
        }
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Sets the log identity.
    #[must_use]
    pub fn with_identity(mut self, identity: LogIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the record number.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RecnoOverflow`] if `recno` exceeds the
    /// 4-byte field.
    pub fn with_recno(mut self, recno: u64) -> ProtocolResult<Self> {
        self.recno = Some(u32::try_from(recno).map_err(|_| ProtocolError::RecnoOverflow(recno))?);
        Ok(self)
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<Bytes>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Builds the response to this packet: same request id and identity.
    #[must_use]
    pub fn reply(&self, command: Command) -> Self {
        Self {
            request_id: self.request_id,
            identity: self.identity,
            ..Self::new(command)
        }
    }

    /// Record number widened to `u64`.
    #[must_use]
    pub fn recno_u64(&self) -> Option<u64> {
        self.recno.map(u64::from)
    }

    /// Flag byte implied by the present fields.
    #[must_use]
    pub fn flags(&self) -> u8 {
        let mut bits = 0;
        if self.request_id.is_some() {
            bits |= flags::HAS_RID;
        }
        if self.identity.is_some() {
            bits |= flags::HAS_ID;
        }
        if self.recno.is_some() {
            bits |= flags::HAS_RECNO;
        }
        if self.timestamp.is_some() {
            bits |= flags::HAS_TS;
        }
        if self.signature.is_some() {
            bits |= flags::HAS_SIG;
        }
        bits
    }

    /// Total encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FIXED_HEADER_SIZE
            + optional_len(self.flags())
            + self.payload.len()
            + self.signature.as_ref().map_or(0, Bytes::len)
    }

    /// Encodes the packet.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooLarge`] if the payload or signature
    /// does not fit its length field.
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Encodes the packet onto the end of `buf`.
    ///
    /// # Errors
    ///
    /// Same as [`Packet::encode`].
    pub fn encode_into(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        let data_length = u32::try_from(self.payload.len()).map_err(|_| ProtocolError::TooLarge {
            len: self.payload.len(),
            max: u32::MAX as usize,
        })?;
        let sig_length = match &self.signature {
            Some(sig) => Some(u16::try_from(sig.len()).map_err(|_| ProtocolError::TooLarge {
                len: sig.len(),
                max: MAX_SIGNATURE_LEN,
            })?),
            None => None,
        };

        buf.reserve(self.encoded_len());
        buf.put_u8(self.version);
        buf.put_u8(self.command.code());
        buf.put_u8(self.flags());
        buf.put_u8(0);
        buf.put_u32(data_length);
        if let Some(rid) = self.request_id {
            buf.put_u64(rid);
        }
        if let Some(identity) = &self.identity {
            buf.put_slice(identity.as_bytes());
        }
        if let Some(recno) = self.recno {
            buf.put_u32(recno);
        }
        if let Some(ts) = &self.timestamp {
            buf.put_slice(&ts.to_bytes());
        }
        if let Some(len) = sig_length {
            buf.put_u16(len);
        }
        buf.put_slice(&self.payload);
        if let Some(sig) = &self.signature {
            buf.put_slice(sig);
        }
        Ok(())
    }

    /// Decodes a packet from the start of `input`.
    ///
    /// Never fails because of missing bytes: an incomplete packet yields
    /// [`Decoded::NeedMoreData`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::VersionMismatch`] for an unsupported
    /// version, or a core error for a malformed timestamp.
    pub fn decode(input: &[u8]) -> ProtocolResult<Decoded> {
        let have = input.len();
        if have < FIXED_HEADER_SIZE {
            return Ok(Decoded::NeedMoreData {
                have,
                need: FIXED_HEADER_SIZE,
            });
        }
        let version = input[0];
        if !(MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&version) {
            return Err(ProtocolError::VersionMismatch {
                found: version,
                min: MIN_PROTOCOL_VERSION,
                max: PROTOCOL_VERSION,
            });
        }
        let command = Command(input[1]);
        let flag_bits = input[2];
        let data_length = u32::from_be_bytes([input[4], input[5], input[6], input[7]]) as usize;

        let opt_len = optional_len(flag_bits);
        let prefix_len = FIXED_HEADER_SIZE + opt_len;
        if have < prefix_len {
            return Ok(Decoded::NeedMoreData {
                have,
                need: prefix_len + data_length,
            });
        }

        let mut cur = &input[FIXED_HEADER_SIZE..prefix_len];
        let request_id = (flag_bits & flags::HAS_RID != 0).then(|| cur.get_u64());
        let identity = if flag_bits & flags::HAS_ID != 0 {
            let mut bytes = [0u8; NAME_LEN];
            cur.copy_to_slice(&mut bytes);
            Some(Name::from_bytes(bytes))
        } else {
            None
        };
        let recno = (flag_bits & flags::HAS_RECNO != 0).then(|| cur.get_u32());
        let timestamp = if flag_bits & flags::HAS_TS != 0 {
            let mut bytes = [0u8; TIMESTAMP_SIZE];
            cur.copy_to_slice(&mut bytes);
            Some(Timestamp::from_bytes(&bytes)?)
        } else {
            None
        };
        let sig_length = if flag_bits & flags::HAS_SIG != 0 {
            usize::from(cur.get_u16())
        } else {
            0
        };

        let total = prefix_len + data_length + sig_length;
        if have < total {
            return Ok(Decoded::NeedMoreData { have, need: total });
        }

        let data_end = prefix_len + data_length;
        let payload = Bytes::copy_from_slice(&input[prefix_len..data_end]);
        let signature = (flag_bits & flags::HAS_SIG != 0)
            .then(|| Bytes::copy_from_slice(&input[data_end..total]));

        Ok(Decoded::Packet {
            packet: Self {
                version,
                command,
                request_id,
                identity,
                recno,
                timestamp,
                payload,
                signature,
            },
            consumed: total,
        })
    }

    /// Decodes exactly one complete packet.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ShortRead`] if `input` is incomplete, or as
    /// [`Packet::decode`].
    pub fn decode_complete(input: &[u8]) -> ProtocolResult<Self> {
        match Self::decode(input)? {
            Decoded::Packet { packet, .. } => Ok(packet),
            Decoded::NeedMoreData { have, need } => Err(ProtocolError::ShortRead { need, have }),
        }
    }

    /// Packs a record into a packet carrying its recno, timestamp, payload
    /// and signature.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RecnoOverflow`] if the recno does not fit.
    pub fn from_record(
        command: Command,
        identity: LogIdentity,
        record: &LogRecord,
    ) -> ProtocolResult<Self> {
        let mut packet = Self::new(command)
            .with_identity(identity)
            .with_recno(record.recno)?
            .with_timestamp(record.timestamp)
            .with_payload(record.payload.clone());
        if let Some(sig) = &record.signature {
            packet = packet.with_signature(sig.clone());
        }
        Ok(packet)
    }

    /// Extracts a record. Without a recno the record number is 0, meaning
    /// "assign the next one"; without a timestamp it is the current time.
    #[must_use]
    pub fn to_record(&self) -> LogRecord {
        LogRecord {
            recno: self.recno_u64().unwrap_or(0),
            timestamp: self.timestamp.unwrap_or_else(Timestamp::now),
            payload: self.payload.to_vec(),
            signature: self.signature.as_ref().map(|s| s.to_vec()),
        }
    }

    /// Returns the identity or fails with [`ProtocolError::MissingField`].
    ///
    /// # Errors
    ///
    /// See above.
    pub fn require_identity(&self) -> ProtocolResult<LogIdentity> {
        self.identity.ok_or(ProtocolError::MissingField("log identity"))
    }
}
