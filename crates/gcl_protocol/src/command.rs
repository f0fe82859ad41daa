//! The command byte.
//!
//! The code space is partitioned so a receiver can classify a code it does
//! not know:
//!
//! | Range   | Class                                   |
//! |---------|-----------------------------------------|
//! | 0-63    | blind (no response expected)            |
//! | 64-127  | acknowledged requests                   |
//! | 128-191 | positive acknowledgments                |
//! | 192-223 | negative acknowledgments, client fault  |
//! | 224-254 | negative acknowledgments, server fault  |
//! | 255     | reserved                                |

use std::fmt;

/// Broad class of a command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Fire-and-forget.
    Blind,
    /// Request expecting an ACK or NAK.
    Request,
    /// Positive acknowledgment.
    Ack,
    /// Negative acknowledgment caused by the client.
    ClientNak,
    /// Negative acknowledgment caused by the server.
    ServerNak,
    /// Code 255.
    Reserved,
}

/// A command code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Command(pub u8);

impl Command {
    /// Keep the connection alive.
    pub const KEEPALIVE: Self = Self(0);

    /// Liveness probe.
    pub const PING: Self = Self(64);
    /// Peer introduction; carries the sender's server name.
    pub const HELLO: Self = Self(65);
    /// Create a log; payload is serialized metadata.
    pub const CREATE: Self = Self(66);
    /// Open a log for appending.
    pub const OPEN_AO: Self = Self(67);
    /// Open a log for reading.
    pub const OPEN_RO: Self = Self(68);
    /// Close a log.
    pub const CLOSE: Self = Self(69);
    /// Read one record.
    pub const READ: Self = Self(70);
    /// Append a record.
    pub const PUBLISH: Self = Self(71);
    /// Stream records; payload is a 4-byte count.
    pub const SUBSCRIBE: Self = Self(72);
    /// Read several records; payload is a 4-byte count.
    pub const MULTIREAD: Self = Self(73);
    /// Fetch a log's metadata.
    pub const GETMETADATA: Self = Self(74);

    /// Generic success.
    pub const ACK_SUCCESS: Self = Self(128);
    /// Log or record created.
    pub const ACK_CREATED: Self = Self(129);
    /// Deleted; also marks the end of a subscription.
    pub const ACK_DELETED: Self = Self(130);
    /// Valid.
    pub const ACK_VALID: Self = Self(131);
    /// Changed.
    pub const ACK_CHANGED: Self = Self(132);
    /// Carries content (a record or metadata).
    pub const ACK_CONTENT: Self = Self(133);

    /// Malformed request.
    pub const NAK_C_BADREQ: Self = Self(192);
    /// Not authorized.
    pub const NAK_C_UNAUTH: Self = Self(193);
    /// Bad option.
    pub const NAK_C_BADOPT: Self = Self(194);
    /// Forbidden, e.g. out-of-sequence recno.
    pub const NAK_C_FORBIDDEN: Self = Self(195);
    /// Log or record not found.
    pub const NAK_C_NOTFOUND: Self = Self(196);
    /// Command not allowed on this log.
    pub const NAK_C_METHNOTALLOWED: Self = Self(197);
    /// Not acceptable, e.g. bad signature.
    pub const NAK_C_NOTACCEPTABLE: Self = Self(198);
    /// Conflict, e.g. log already exists.
    pub const NAK_C_CONFLICT: Self = Self(201);
    /// Precondition failed.
    pub const NAK_C_PRECONFAILED: Self = Self(204);
    /// Record or metadata too large.
    pub const NAK_C_TOOLARGE: Self = Self(205);
    /// Unsupported media type.
    pub const NAK_C_UNSUPMEDIA: Self = Self(207);

    /// Internal server error.
    pub const NAK_S_INTERNAL: Self = Self(224);
    /// Not implemented.
    pub const NAK_S_NOTIMPL: Self = Self(225);
    /// Bad gateway.
    pub const NAK_S_BADGATEWAY: Self = Self(226);
    /// Service unavailable, e.g. no replica set.
    pub const NAK_S_SVCUNAVAIL: Self = Self(227);
    /// Gateway timeout, e.g. replicas did not answer.
    pub const NAK_S_GWTIMEOUT: Self = Self(228);
    /// Proxying not supported.
    pub const NAK_S_PROXYNOTSUP: Self = Self(229);

    /// Returns the raw code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Classifies the code by range.
    #[must_use]
    pub const fn class(self) -> CommandClass {
        match self.0 {
            0..=63 => CommandClass::Blind,
            64..=127 => CommandClass::Request,
            128..=191 => CommandClass::Ack,
            192..=223 => CommandClass::ClientNak,
            224..=254 => CommandClass::ServerNak,
            255 => CommandClass::Reserved,
        }
    }

    /// Returns true for ACK codes.
    #[must_use]
    pub const fn is_ack(self) -> bool {
        matches!(self.class(), CommandClass::Ack)
    }

    /// Returns true for client or server NAK codes.
    #[must_use]
    pub const fn is_nak(self) -> bool {
        matches!(self.class(), CommandClass::ClientNak | CommandClass::ServerNak)
    }

    /// Returns true for ACKs and NAKs.
    #[must_use]
    pub const fn is_response(self) -> bool {
        self.is_ack() || self.is_nak()
    }

    /// Symbolic name, if the code is known.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::KEEPALIVE => "KEEPALIVE",
            Self::PING => "PING",
            Self::HELLO => "HELLO",
            Self::CREATE => "CREATE",
            Self::OPEN_AO => "OPEN_AO",
            Self::OPEN_RO => "OPEN_RO",
            Self::CLOSE => "CLOSE",
            Self::READ => "READ",
            Self::PUBLISH => "PUBLISH",
            Self::SUBSCRIBE => "SUBSCRIBE",
            Self::MULTIREAD => "MULTIREAD",
            Self::GETMETADATA => "GETMETADATA",
            Self::ACK_SUCCESS => "ACK_SUCCESS",
            Self::ACK_CREATED => "ACK_CREATED",
            Self::ACK_DELETED => "ACK_DELETED",
            Self::ACK_VALID => "ACK_VALID",
            Self::ACK_CHANGED => "ACK_CHANGED",
            Self::ACK_CONTENT => "ACK_CONTENT",
            Self::NAK_C_BADREQ => "NAK_C_BADREQ",
            Self::NAK_C_UNAUTH => "NAK_C_UNAUTH",
            Self::NAK_C_BADOPT => "NAK_C_BADOPT",
            Self::NAK_C_FORBIDDEN => "NAK_C_FORBIDDEN",
            Self::NAK_C_NOTFOUND => "NAK_C_NOTFOUND",
            Self::NAK_C_METHNOTALLOWED => "NAK_C_METHNOTALLOWED",
            Self::NAK_C_NOTACCEPTABLE => "NAK_C_NOTACCEPTABLE",
            Self::NAK_C_CONFLICT => "NAK_C_CONFLICT",
            Self::NAK_C_PRECONFAILED => "NAK_C_PRECONFAILED",
            Self::NAK_C_TOOLARGE => "NAK_C_TOOLARGE",
            Self::NAK_C_UNSUPMEDIA => "NAK_C_UNSUPMEDIA",
            Self::NAK_S_INTERNAL => "NAK_S_INTERNAL",
            Self::NAK_S_NOTIMPL => "NAK_S_NOTIMPL",
            Self::NAK_S_BADGATEWAY => "NAK_S_BADGATEWAY",
            Self::NAK_S_SVCUNAVAIL => "NAK_S_SVCUNAVAIL",
            Self::NAK_S_GWTIMEOUT => "NAK_S_GWTIMEOUT",
            Self::NAK_S_PROXYNOTSUP => "NAK_S_PROXYNOTSUP",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        Self(code)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "Command({})", self.0),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "CMD_{}", self.0),
        }
    }
}
