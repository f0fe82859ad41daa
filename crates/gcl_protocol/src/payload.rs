//! Payload conventions for individual commands.
//!
//! - CREATE and GETMETADATA replies carry a serialized metadata set.
//! - SUBSCRIBE and MULTIREAD carry a 4-byte record count, 0 meaning
//!   unbounded. The packet's recno is the first record wanted.
//! - HELLO carries the sender's 32-byte server name.

use crate::command::Command;
use crate::error::{ProtocolError, ProtocolResult};
use crate::packet::Packet;
use bytes::Bytes;
use gcl_core::{LogIdentity, MetadataSet, Name, ServerId, NAME_LEN};

/// Encodes a record count.
#[must_use]
pub fn encode_count(count: u32) -> Bytes {
    Bytes::copy_from_slice(&count.to_be_bytes())
}

/// Decodes a record count. An empty payload means 0 (unbounded).
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPayload`] unless the payload is empty
/// or exactly 4 bytes.
pub fn decode_count(payload: &[u8]) -> ProtocolResult<u32> {
    match payload.len() {
        0 => Ok(0),
        4 => Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])),
        n => Err(ProtocolError::InvalidPayload(format!(
            "record count must be 4 bytes, got {n}"
        ))),
    }
}

/// Serializes metadata for a CREATE request or GETMETADATA reply.
///
/// # Errors
///
/// Returns an error if the set cannot be serialized.
pub fn encode_metadata(metadata: &MetadataSet) -> ProtocolResult<Bytes> {
    Ok(Bytes::from(metadata.serialize()?))
}

/// Deserializes metadata. An empty payload is an empty set.
///
/// # Errors
///
/// Returns an error if the payload is not a valid metadata set.
pub fn decode_metadata(payload: &[u8]) -> ProtocolResult<MetadataSet> {
    if payload.is_empty() {
        return Ok(MetadataSet::new());
    }
    Ok(MetadataSet::deserialize(payload)?)
}

/// Decodes a HELLO payload.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPayload`] if the payload is not a name.
pub fn decode_hello(payload: &[u8]) -> ProtocolResult<ServerId> {
    if payload.len() != NAME_LEN {
        return Err(ProtocolError::InvalidPayload(format!(
            "HELLO payload must be {NAME_LEN} bytes, got {}",
            payload.len()
        )));
    }
    Ok(Name::from_slice(payload)?)
}

/// Builds a HELLO announcing `server`.
#[must_use]
pub fn hello(request_id: u64, server: &ServerId) -> Packet {
    Packet::new(Command::HELLO)
        .with_request_id(request_id)
        .with_payload(Bytes::copy_from_slice(server.as_bytes()))
}

/// Builds a CREATE request.
///
/// # Errors
///
/// Returns an error if the metadata cannot be serialized.
pub fn create(
    request_id: u64,
    identity: LogIdentity,
    metadata: &MetadataSet,
) -> ProtocolResult<Packet> {
    Ok(Packet::new(Command::CREATE)
        .with_request_id(request_id)
        .with_identity(identity)
        .with_payload(encode_metadata(metadata)?))
}

/// Builds a READ request for one record.
///
/// # Errors
///
/// Returns [`ProtocolError::RecnoOverflow`] if `recno` does not fit.
pub fn read(request_id: u64, identity: LogIdentity, recno: u64) -> ProtocolResult<Packet> {
    Packet::new(Command::READ)
        .with_request_id(request_id)
        .with_identity(identity)
        .with_recno(recno)
}

/// Builds a SUBSCRIBE or MULTIREAD request.
///
/// # Errors
///
/// Returns [`ProtocolError::RecnoOverflow`] if `from` does not fit.
pub fn ranged(
    command: Command,
    request_id: u64,
    identity: LogIdentity,
    from: u64,
    count: u32,
) -> ProtocolResult<Packet> {
    Ok(Packet::new(command)
        .with_request_id(request_id)
        .with_identity(identity)
        .with_recno(from)?
        .with_payload(encode_count(count)))
}
