//! Error types for GCL core.

use gcl_storage::StorageError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type GclResult<T> = Result<T, GclError>;

/// Broad classification of a failure.
///
/// Callers use the kind to decide between surfacing, retrying and aborting
/// without matching every individual variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad magic, bad version, corrupt length. Never retried.
    Format,
    /// Unknown record, metadata entry or log.
    NotFound,
    /// A record or metadata entry is too large. Raised before any I/O.
    Overflow,
    /// No replica set is configured. The caller may retry later.
    ServiceUnavailable,
    /// One or more replica forwards failed.
    PartialReplication,
    /// Short or partial read on the wire. Buffer and retry the decode.
    Transport,
    /// Mutation of a read-only metadata set.
    ReadOnly,
    /// A log with the same identity already exists.
    AlreadyExists,
    /// Caller supplied an unusable argument.
    InvalidArgument,
    /// Underlying I/O failure.
    Io,
    /// The log has been closed.
    Closed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Format => "format",
            Self::NotFound => "not found",
            Self::Overflow => "overflow",
            Self::ServiceUnavailable => "service unavailable",
            Self::PartialReplication => "partial replication",
            Self::Transport => "transport",
            Self::ReadOnly => "read-only",
            Self::AlreadyExists => "already exists",
            Self::InvalidArgument => "invalid argument",
            Self::Io => "I/O",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in GCL core operations.
#[derive(Debug, Error)]
pub enum GclError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record payload exceeds the configured maximum record size.
    #[error("record payload of {len} bytes exceeds maximum of {max} bytes")]
    EncodeOverflow {
        /// Payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Fewer bytes than the fixed record header.
    #[error("truncated record: need {need} bytes, have {have}")]
    TruncatedRecord {
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// Declared payload length runs past the supplied buffer.
    #[error("corrupt record length: declared {declared} bytes, {available} available")]
    CorruptLength {
        /// Declared payload length.
        declared: u64,
        /// Bytes remaining after the record header.
        available: usize,
    },

    /// Timestamp nanoseconds outside `[0, 1e9)`.
    #[error("invalid timestamp: nanoseconds {nanoseconds} out of range")]
    InvalidTimestamp {
        /// The offending nanosecond value.
        nanoseconds: u32,
    },

    /// Serialized metadata is shorter than its entry count.
    #[error("metadata truncated: {have} bytes, need at least 2")]
    MetadataTruncated {
        /// Bytes available.
        have: usize,
    },

    /// Serialized metadata is shorter than its entry header array.
    #[error("metadata header truncated: {count} entries need {need} bytes, have {have}")]
    MetadataHeaderTruncated {
        /// Declared entry count.
        count: usize,
        /// Bytes required for the header array.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// Declared metadata lengths exceed the remaining bytes.
    #[error("metadata data truncated: entries declare {declared} bytes, have {have}")]
    MetadataDataTruncated {
        /// Sum of declared entry lengths.
        declared: u64,
        /// Bytes available.
        have: usize,
    },

    /// Metadata entry or entry count too large to encode.
    #[error("metadata overflow: {message}")]
    MetadataOverflow {
        /// What overflowed.
        message: String,
    },

    /// Attempt to mutate a read-only metadata set.
    #[error("metadata set is read-only")]
    ReadOnly,

    /// Metadata entry index out of range.
    #[error("metadata entry {index} not found ({count} entries)")]
    EntryNotFound {
        /// Requested index.
        index: usize,
        /// Entry count.
        count: usize,
    },

    /// Record number not present in the log.
    #[error("record {recno} not found (last record is {last_recno})")]
    RecordNotFound {
        /// Requested record number.
        recno: u64,
        /// Highest record number in the log.
        last_recno: u64,
    },

    /// No log with this identity.
    #[error("log not found: {name}")]
    LogNotFound {
        /// Printable log name.
        name: String,
    },

    /// A log with this identity already exists.
    #[error("log already exists: {name}")]
    AlreadyExists {
        /// Printable log name.
        name: String,
    },

    /// An explicit record number did not follow the last one.
    #[error("record number {actual} does not follow last record {last_recno}")]
    RecnoMismatch {
        /// Record number supplied by the writer.
        actual: u64,
        /// Highest record number in the log.
        last_recno: u64,
    },

    /// The log header magic did not match.
    #[error("bad magic: found {found:#018x}, expected {expected:#018x}")]
    BadMagic {
        /// Magic read from disk.
        found: u64,
        /// Magic this implementation writes.
        expected: u64,
    },

    /// The log format version is newer than this implementation.
    #[error("unsupported log version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Version read from disk.
        found: i64,
        /// Highest version understood.
        supported: i64,
    },

    /// The record stream is corrupt.
    #[error("corrupt log: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// An argument was not acceptable.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The log has been closed.
    #[error("log is closed")]
    Closed,
}

impl GclError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a metadata overflow error.
    pub fn metadata_overflow(message: impl Into<String>) -> Self {
        Self::MetadataOverflow {
            message: message.into(),
        }
    }

    /// Returns the broad classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(StorageError::NotFound(_)) => ErrorKind::NotFound,
            Self::Storage(StorageError::AlreadyExists(_)) => ErrorKind::AlreadyExists,
            Self::Storage(StorageError::ReadPastEnd { .. }) => ErrorKind::Format,
            Self::Storage(_) | Self::Io(_) => ErrorKind::Io,
            Self::EncodeOverflow { .. } | Self::MetadataOverflow { .. } => ErrorKind::Overflow,
            Self::TruncatedRecord { .. }
            | Self::CorruptLength { .. }
            | Self::InvalidTimestamp { .. }
            | Self::MetadataTruncated { .. }
            | Self::MetadataHeaderTruncated { .. }
            | Self::MetadataDataTruncated { .. }
            | Self::BadMagic { .. }
            | Self::UnsupportedVersion { .. }
            | Self::Corrupt { .. } => ErrorKind::Format,
            Self::ReadOnly => ErrorKind::ReadOnly,
            Self::EntryNotFound { .. } | Self::RecordNotFound { .. } | Self::LogNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidArgument { .. } | Self::RecnoMismatch { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// Returns true if the error means the requested item does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
