//! Stream framing.
//!
//! Packets arrive over a byte stream, so a read may end anywhere inside a
//! packet. [`FrameBuffer`] accumulates bytes and hands out complete
//! packets; [`read_packet`] and [`read_packet_async`] pull exactly one
//! packet off a reader.

use crate::error::{ProtocolError, ProtocolResult};
use crate::packet::{optional_len, Decoded, Packet, FIXED_HEADER_SIZE};
use bytes::{Buf, BytesMut};
use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Default cap on a single packet's data section (64 MiB).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// Accumulates stream bytes and yields complete packets.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_packet_size: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Creates an empty buffer with the default packet size cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Creates an empty buffer rejecting packets larger than `max`.
    #[must_use]
    pub fn with_max_packet_size(max: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_packet_size: max,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Mutable access to the buffer for direct reads into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Removes and returns the next complete packet, if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooLarge`] for a packet above the cap, or
    /// a decode error. The buffer is left untouched on error.
    pub fn next_packet(&mut self) -> ProtocolResult<Option<Packet>> {
        match Packet::decode(&self.buf)? {
            Decoded::Packet { packet, consumed } => {
                self.buf.advance(consumed);
                trace!(command = %packet.command, consumed, "framed packet");
                Ok(Some(packet))
            }
            Decoded::NeedMoreData { need, .. } => {
                if need > self.max_packet_size {
                    return Err(ProtocolError::TooLarge {
                        len: need,
                        max: self.max_packet_size,
                    });
                }
                Ok(None)
            }
        }
    }
}

/// Number of bytes following the fixed prefix, capped so a hostile length
/// cannot force a large allocation.
fn remaining_len(prefix: &[u8; FIXED_HEADER_SIZE]) -> ProtocolResult<usize> {
    let data_length = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
    let remaining = optional_len(prefix[2]) + data_length;
    if FIXED_HEADER_SIZE + remaining > DEFAULT_MAX_PACKET_SIZE {
        return Err(ProtocolError::TooLarge {
            len: FIXED_HEADER_SIZE + remaining,
            max: DEFAULT_MAX_PACKET_SIZE,
        });
    }
    Ok(remaining)
}

/// Signature length, if the packet has one, from its optional section.
fn signature_len(prefix: &[u8; FIXED_HEADER_SIZE], rest: &[u8]) -> usize {
    if prefix[2] & crate::packet::flags::HAS_SIG == 0 {
        return 0;
    }
    let at = optional_len(prefix[2]) - 2;
    usize::from(u16::from_be_bytes([rest[at], rest[at + 1]]))
}

fn short_read(e: io::Error, need: usize, have: usize) -> ProtocolError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::ShortRead { need, have }
    } else {
        ProtocolError::Io(e)
    }
}

fn assemble(prefix: [u8; FIXED_HEADER_SIZE], rest: Vec<u8>, sig: Vec<u8>) -> ProtocolResult<Packet> {
    let mut full = Vec::with_capacity(FIXED_HEADER_SIZE + rest.len() + sig.len());
    full.extend_from_slice(&prefix);
    full.extend_from_slice(&rest);
    full.extend_from_slice(&sig);
    Packet::decode_complete(&full)
}

/// Reads one packet from a blocking reader.
///
/// Returns `Ok(None)` on a clean end of stream between packets.
///
/// # Errors
///
/// Returns [`ProtocolError::ShortRead`] if the stream ends mid-packet,
/// [`ProtocolError::TooLarge`] if the declared length exceeds
/// [`DEFAULT_MAX_PACKET_SIZE`], or a decode error.
pub fn read_packet<R: Read>(reader: &mut R) -> ProtocolResult<Option<Packet>> {
    let mut prefix = [0u8; FIXED_HEADER_SIZE];
    let mut got = 0;
    while got < FIXED_HEADER_SIZE {
        match reader.read(&mut prefix[got..]) {
            Ok(0) if got == 0 => return Ok(None),
            Ok(0) => {
                return Err(ProtocolError::ShortRead {
                    need: FIXED_HEADER_SIZE,
                    have: got,
                })
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    // version check before allocating for the body
    Packet::decode(&prefix)?;

    let mut rest = vec![0u8; remaining_len(&prefix)?];
    reader
        .read_exact(&mut rest)
        .map_err(|e| short_read(e, FIXED_HEADER_SIZE + rest.len(), FIXED_HEADER_SIZE))?;
    let mut sig = vec![0u8; signature_len(&prefix, &rest)];
    let sig_len = sig.len();
    reader.read_exact(&mut sig).map_err(|e| {
        short_read(
            e,
            FIXED_HEADER_SIZE + rest.len() + sig_len,
            FIXED_HEADER_SIZE + rest.len(),
        )
    })?;
    assemble(prefix, rest, sig).map(Some)
}

/// Reads one packet from an async reader.
///
/// Returns `Ok(None)` on a clean end of stream between packets.
///
/// # Errors
///
/// Same as [`read_packet`].
pub async fn read_packet_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> ProtocolResult<Option<Packet>> {
    let mut prefix = [0u8; FIXED_HEADER_SIZE];
    let mut got = 0;
    while got < FIXED_HEADER_SIZE {
        let n = reader.read(&mut prefix[got..]).await?;
        if n == 0 {
            if got == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::ShortRead {
                need: FIXED_HEADER_SIZE,
                have: got,
            });
        }
        got += n;
    }
    Packet::decode(&prefix)?;

    let mut rest = vec![0u8; remaining_len(&prefix)?];
    reader
        .read_exact(&mut rest)
        .await
        .map_err(|e| short_read(e, FIXED_HEADER_SIZE + rest.len(), FIXED_HEADER_SIZE))?;
    let mut sig = vec![0u8; signature_len(&prefix, &rest)];
    let sig_len = sig.len();
    reader.read_exact(&mut sig).await.map_err(|e| {
        short_read(
            e,
            FIXED_HEADER_SIZE + rest.len() + sig_len,
            FIXED_HEADER_SIZE + rest.len(),
        )
    })?;
    assemble(prefix, rest, sig).map(Some)
}
