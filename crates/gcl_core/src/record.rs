//! Log records and their on-disk encoding.
//!
//! Each record is stored as a fixed 32-byte header followed by the payload:
//!
//! ```text
//! recno(8) | ts_seconds(8) | ts_nanoseconds(4) | ts_accuracy(4) | data_length(8) | data
//! ```
//!
//! All integers are big-endian. Signatures travel on the wire but are not
//! part of the stored record.

use crate::error::{GclError, GclResult};
use crate::timestamp::{Timestamp, TIMESTAMP_SIZE};

/// Size of the fixed record header.
pub const RECORD_HEADER_SIZE: usize = 8 + TIMESTAMP_SIZE + 8;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// A single immutable log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// 1-based record number.
    pub recno: u64,
    /// Commit timestamp.
    pub timestamp: Timestamp,
    /// Application payload.
    pub payload: Vec<u8>,
    /// Writer signature over [`crate::signing_input`], if any.
    pub signature: Option<Vec<u8>>,
}

impl LogRecord {
    /// Creates an unsigned record.
    #[must_use]
    pub fn new(recno: u64, timestamp: Timestamp, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            recno,
            timestamp,
            payload: payload.into(),
            signature: None,
        }
    }

    /// Attaches a signature.
    #[must_use]
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// The fixed header of an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record number.
    pub recno: u64,
    /// Commit timestamp.
    pub timestamp: Timestamp,
    /// Payload length in bytes.
    pub data_length: u64,
}

impl RecordHeader {
    /// Parses a record header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::TruncatedRecord`] if fewer than
    /// [`RECORD_HEADER_SIZE`] bytes are supplied.
    pub fn parse(bytes: &[u8]) -> GclResult<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(GclError::TruncatedRecord {
                need: RECORD_HEADER_SIZE,
                have: bytes.len(),
            });
        }
        let recno = read_u64(&bytes[0..8]);
        let mut ts = [0u8; TIMESTAMP_SIZE];
        ts.copy_from_slice(&bytes[8..8 + TIMESTAMP_SIZE]);
        let timestamp = Timestamp::from_bytes(&ts)?;
        let data_length = read_u64(&bytes[8 + TIMESTAMP_SIZE..RECORD_HEADER_SIZE]);
        Ok(Self {
            recno,
            timestamp,
            data_length,
        })
    }

    /// Total encoded length, header included.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::Corrupt`] if the declared payload length cannot
    /// be addressed.
    pub fn record_len(&self) -> GclResult<u64> {
        self.data_length
            .checked_add(RECORD_HEADER_SIZE as u64)
            .ok_or_else(|| {
                GclError::corrupt(format!(
                    "record {} declares {} payload bytes",
                    self.recno, self.data_length
                ))
            })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// Encodes and decodes records, enforcing a maximum payload size.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    max_record_size: usize,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_SIZE)
    }
}

impl RecordCodec {
    /// Creates a codec accepting payloads up to `max_record_size` bytes.
    #[must_use]
    pub const fn new(max_record_size: usize) -> Self {
        Self { max_record_size }
    }

    /// Returns the maximum payload size.
    #[must_use]
    pub const fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Checks a payload length against the maximum record size.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::EncodeOverflow`] if `len` is too large.
    pub fn check_size(&self, len: usize) -> GclResult<()> {
        if len > self.max_record_size {
            return Err(GclError::EncodeOverflow {
                len,
                max: self.max_record_size,
            });
        }
        Ok(())
    }

    /// Encodes a record.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::EncodeOverflow`] if the payload exceeds the
    /// maximum record size.
    pub fn encode(&self, record: &LogRecord) -> GclResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(record.encoded_len());
        self.encode_into(record, &mut buf)?;
        Ok(buf)
    }

    /// Encodes a record onto the end of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::EncodeOverflow`] if the payload exceeds the
    /// maximum record size. `buf` is untouched on error.
    pub fn encode_into(&self, record: &LogRecord, buf: &mut Vec<u8>) -> GclResult<()> {
        self.encode_parts(record.recno, &record.timestamp, &record.payload, buf)
    }

    /// Encodes a record given as separate fields onto the end of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::EncodeOverflow`] if the payload exceeds the
    /// maximum record size.
    pub fn encode_parts(
        &self,
        recno: u64,
        timestamp: &Timestamp,
        payload: &[u8],
        buf: &mut Vec<u8>,
    ) -> GclResult<()> {
        self.check_size(payload.len())?;
        buf.reserve(RECORD_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&recno.to_be_bytes());
        buf.extend_from_slice(&timestamp.to_bytes());
        buf.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        buf.extend_from_slice(payload);
        Ok(())
    }

    /// Decodes a record from the start of `bytes`, ignoring trailing bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::TruncatedRecord`] if the fixed header is
    /// incomplete and [`GclError::CorruptLength`] if the declared payload
    /// runs past the buffer.
    pub fn decode(&self, bytes: &[u8]) -> GclResult<LogRecord> {
        self.decode_prefix(bytes).map(|(record, _)| record)
    }

    /// Decodes a record and returns it with the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Same as [`RecordCodec::decode`].
    pub fn decode_prefix(&self, bytes: &[u8]) -> GclResult<(LogRecord, usize)> {
        let header = RecordHeader::parse(bytes)?;
        let available = bytes.len() - RECORD_HEADER_SIZE;
        let len = usize::try_from(header.data_length)
            .ok()
            .filter(|len| *len <= available)
            .ok_or(GclError::CorruptLength {
                declared: header.data_length,
                available,
            })?;
        let payload = bytes[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + len].to_vec();
        Ok((
            LogRecord::new(header.recno, header.timestamp, payload),
            RECORD_HEADER_SIZE + len,
        ))
    }
}
