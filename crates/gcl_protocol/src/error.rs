//! Error types for the wire protocol.

use gcl_core::{ErrorKind, GclError};
use std::io;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended before the packet was complete.
    #[error("short read: packet needs {need} bytes, stream gave {have}")]
    ShortRead {
        /// Bytes the packet requires.
        need: usize,
        /// Bytes actually received.
        have: usize,
    },

    /// The packet's protocol version is outside the supported range.
    #[error("protocol version {found} not in supported range {min}..={max}")]
    VersionMismatch {
        /// Version in the packet.
        found: u8,
        /// Oldest accepted version.
        min: u8,
        /// Newest accepted version.
        max: u8,
    },

    /// A record number does not fit the 4-byte wire field.
    #[error("record number {0} does not fit the wire recno field")]
    RecnoOverflow(u64),

    /// The payload or signature is too large to frame.
    #[error("packet field too large: {len} bytes exceeds {max}")]
    TooLarge {
        /// Field length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// The payload does not match the command's convention.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A field required by the command is absent.
    #[error("missing packet field: {0}")]
    MissingField(&'static str),

    /// Error from the data model (bad timestamp, bad metadata).
    #[error(transparent)]
    Core(#[from] GclError),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Returns the broad classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShortRead { .. } | Self::Io(_) => ErrorKind::Transport,
            Self::VersionMismatch { .. } | Self::InvalidPayload(_) | Self::MissingField(_) => {
                ErrorKind::Format
            }
            Self::RecnoOverflow(_) | Self::TooLarge { .. } => ErrorKind::Overflow,
            Self::Core(e) => e.kind(),
        }
    }
}
