//! Error types for the log server.

use gcl_core::{ErrorKind, GclError};
use gcl_protocol::{Command, Packet, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the log server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Log store error.
    #[error(transparent)]
    Core(#[from] GclError),

    /// Wire protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request is well-formed but not permitted.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The record was rejected, e.g. by the signature policy.
    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    /// The command is not implemented.
    #[error("command {0} not implemented")]
    NotImplemented(Command),

    /// No replica set is configured for the log.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Replicas failed to acknowledge.
    #[error("replication failed: {acked} of {forwarded} replicas acknowledged, quorum {quorum}")]
    PartialReplication {
        /// Replicas that acknowledged.
        acked: usize,
        /// Replicas the append was forwarded to.
        forwarded: usize,
        /// Acknowledgments required.
        quorum: usize,
    },

    /// Replicas did not answer in time.
    #[error("replication timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// A replica could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// Bad configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// A remote server answered with a NAK.
    #[error("server replied {command}: {message}")]
    Rejected {
        /// The NAK code.
        command: Command,
        /// The server's explanation, if it sent one.
        message: String,
    },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns the broad classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(e) => e.kind(),
            Self::Protocol(e) => e.kind(),
            Self::Io(_) => ErrorKind::Io,
            Self::InvalidRequest(_) | Self::Forbidden(_) | Self::NotAcceptable(_) => {
                ErrorKind::InvalidArgument
            }
            Self::NotImplemented(_) => ErrorKind::Format,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::PartialReplication { .. } | Self::TimedOut(_) => ErrorKind::PartialReplication,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Config(_) | Self::Internal(_) => ErrorKind::InvalidArgument,
            Self::Rejected { command, .. } => nak_kind(*command),
        }
    }

    /// The NAK command reporting this error to a client.
    #[must_use]
    pub fn nak_code(&self) -> Command {
        match self {
            Self::Core(e) => core_nak(e),
            Self::Protocol(ProtocolError::Core(e)) => core_nak(e),
            Self::Protocol(ProtocolError::RecnoOverflow(_) | ProtocolError::TooLarge { .. }) => {
                Command::NAK_C_TOOLARGE
            }
            Self::Protocol(_) | Self::InvalidRequest(_) => Command::NAK_C_BADREQ,
            Self::Forbidden(_) => Command::NAK_C_FORBIDDEN,
            Self::NotAcceptable(_) => Command::NAK_C_NOTACCEPTABLE,
            Self::NotImplemented(_) => Command::NAK_S_NOTIMPL,
            Self::ServiceUnavailable(_) => Command::NAK_S_SVCUNAVAIL,
            Self::TimedOut(_) => Command::NAK_S_GWTIMEOUT,
            Self::PartialReplication { .. } | Self::Transport(_) => Command::NAK_S_BADGATEWAY,
            Self::Io(_) | Self::Config(_) | Self::Internal(_) => Command::NAK_S_INTERNAL,
            Self::Rejected { command, .. } => *command,
        }
    }

    /// Builds the error a client reports for a NAK reply.
    #[must_use]
    pub fn from_nak(reply: &Packet) -> Self {
        Self::Rejected {
            command: reply.command,
            message: String::from_utf8_lossy(&reply.payload).into_owned(),
        }
    }

    /// Returns true if the client caused the error.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.nak_code().is_nak() && self.nak_code().code() < Command::NAK_S_INTERNAL.code()
    }

    /// Returns true if the server caused the error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.nak_code().code() >= Command::NAK_S_INTERNAL.code()
    }
}

fn nak_kind(command: Command) -> ErrorKind {
    match command {
        Command::NAK_C_NOTFOUND => ErrorKind::NotFound,
        Command::NAK_C_CONFLICT => ErrorKind::AlreadyExists,
        Command::NAK_C_TOOLARGE => ErrorKind::Overflow,
        Command::NAK_C_METHNOTALLOWED => ErrorKind::ReadOnly,
        Command::NAK_S_SVCUNAVAIL => ErrorKind::ServiceUnavailable,
        Command::NAK_S_BADGATEWAY | Command::NAK_S_GWTIMEOUT => ErrorKind::PartialReplication,
        Command::NAK_S_INTERNAL => ErrorKind::Io,
        _ => ErrorKind::InvalidArgument,
    }
}

fn core_nak(e: &GclError) -> Command {
    match e {
        GclError::RecnoMismatch { .. } => Command::NAK_C_FORBIDDEN,
        GclError::Corrupt { .. } | GclError::BadMagic { .. } | GclError::UnsupportedVersion { .. } => {
            Command::NAK_S_INTERNAL
        }
        _ => match e.kind() {
            ErrorKind::NotFound => Command::NAK_C_NOTFOUND,
            ErrorKind::AlreadyExists => Command::NAK_C_CONFLICT,
            ErrorKind::Overflow => Command::NAK_C_TOOLARGE,
            ErrorKind::ReadOnly => Command::NAK_C_METHNOTALLOWED,
            ErrorKind::Format | ErrorKind::InvalidArgument => Command::NAK_C_BADREQ,
            ErrorKind::Closed | ErrorKind::ServiceUnavailable => Command::NAK_S_SVCUNAVAIL,
            ErrorKind::PartialReplication | ErrorKind::Transport => Command::NAK_S_BADGATEWAY,
            ErrorKind::Io => Command::NAK_S_INTERNAL,
        },
    }
}
