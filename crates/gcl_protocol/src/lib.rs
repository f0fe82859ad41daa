//! # GCL Protocol
//!
//! Wire format for talking to GCL log servers.
//!
//! This crate provides:
//! - [`Command`]: the command byte and its range-based classes
//! - [`Packet`]: the packet header, optional fields and payload
//! - [`FrameBuffer`], [`read_packet`], [`read_packet_async`]: framing over
//!   byte streams
//! - [`payload`]: per-command payload conventions
//!
//! ## Example
//!
//! ```rust
//! use gcl_protocol::{Command, FrameBuffer, Packet};
//! use gcl_core::Name;
//!
//! let packet = Packet::new(Command::PUBLISH)
//!     .with_request_id(1)
//!     .with_identity(Name::parse("demo"))
//!     .with_payload(&b"hello"[..]);
//! let bytes = packet.encode().unwrap();
//!
//! let mut frames = FrameBuffer::new();
//! frames.extend(&bytes[..5]);
//! assert!(frames.next_packet().unwrap().is_none());
//! frames.extend(&bytes[5..]);
//! assert_eq!(frames.next_packet().unwrap(), Some(packet));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod command;
mod error;
mod frame;
mod packet;
pub mod payload;

pub use command::{Command, CommandClass};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{read_packet, read_packet_async, FrameBuffer, DEFAULT_MAX_PACKET_SIZE};
pub use packet::{
    flags, optional_len, Decoded, Packet, FIXED_HEADER_SIZE, MAX_SIGNATURE_LEN,
    MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
