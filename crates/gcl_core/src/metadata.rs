//! Metadata attached to a log at creation time.
//!
//! Serialized layout (big-endian):
//!
//! ```text
//! count(2) | { id(4) | length(4) } * count | data of entry 0 | data of entry 1 | ...
//! ```
//!
//! Entry headers come first so a reader can size its buffer before reading
//! any entry data.

use crate::error::{GclError, GclResult};
use std::ops::Range;

/// Initial entry capacity of a new set.
pub const MIN_CAPACITY: usize = 4;

/// Largest entry data length. The top byte of the wire length is reserved.
pub const MAX_ENTRY_LEN: usize = 0x00FF_FFFF;

/// Maximum number of entries, bounded by the 2-byte count.
pub const MAX_ENTRIES: usize = u16::MAX as usize;

/// Size of one serialized entry header.
pub const ENTRY_HEADER_SIZE: usize = 8;

/// Well-known metadata ids.
pub mod ids {
    /// Terminator. Accepted by `add` and never stored.
    pub const END_OF_LIST: u32 = 0;
    /// External (human-readable) id of the log.
    pub const XID: u32 = 0x0058_4944;
    /// Random nonce making otherwise identical logs distinct.
    pub const NONCE: u32 = 0x4E4F_4E43;
    /// Creation time, as printable text.
    pub const CREATION_TIME: u32 = 0x0043_5449;
    /// Writer public key.
    pub const PUBKEY: u32 = 0x0050_5542;
}

#[derive(Debug, Clone)]
struct Slot {
    id: u32,
    range: Range<usize>,
}

/// An ordered collection of `(id, data)` entries.
///
/// All entry bytes live in one contiguous buffer. A set built locally is
/// mutable; a set produced by [`MetadataSet::deserialize`] is read-only and
/// rejects [`MetadataSet::add`].
#[derive(Debug, Clone)]
pub struct MetadataSet {
    slots: Vec<Slot>,
    data: Vec<u8>,
    read_only: bool,
}

impl Default for MetadataSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for MetadataSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for MetadataSet {}

impl MetadataSet {
    /// Creates an empty, mutable set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(MIN_CAPACITY),
            data: Vec::new(),
            read_only: false,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the set has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entry slots currently allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Returns true if the set came off the wire or out of a log file.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Appends an entry.
    ///
    /// An `id` of [`ids::END_OF_LIST`] is accepted and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::ReadOnly`] for a deserialized set and
    /// [`GclError::MetadataOverflow`] if the entry or entry count is too
    /// large to encode.
    pub fn add(&mut self, id: u32, data: &[u8]) -> GclResult<()> {
        if self.read_only {
            return Err(GclError::ReadOnly);
        }
        if id == ids::END_OF_LIST {
            return Ok(());
        }
        if data.len() > MAX_ENTRY_LEN {
            return Err(GclError::metadata_overflow(format!(
                "entry {id:#010x} is {} bytes, limit is {MAX_ENTRY_LEN}",
                data.len()
            )));
        }
        if self.slots.len() >= MAX_ENTRIES {
            return Err(GclError::metadata_overflow(format!(
                "more than {MAX_ENTRIES} entries"
            )));
        }
        if self.slots.len() == self.slots.capacity() {
            let grow = (self.slots.capacity() / 2).max(1);
            self.slots.reserve_exact(grow);
        }
        let start = self.data.len();
        self.data.extend_from_slice(data);
        self.slots.push(Slot {
            id,
            range: start..self.data.len(),
        });
        Ok(())
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::EntryNotFound`] if `index >= len()`.
    pub fn get(&self, index: usize) -> GclResult<(u32, &[u8])> {
        self.slots
            .get(index)
            .map(|slot| (slot.id, &self.data[slot.range.clone()]))
            .ok_or(GclError::EntryNotFound {
                index,
                count: self.slots.len(),
            })
    }

    /// Returns the data of the first entry with `id`.
    #[must_use]
    pub fn find(&self, id: u32) -> Option<&[u8]> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| &self.data[slot.range.clone()])
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.slots
            .iter()
            .map(move |slot| (slot.id, &self.data[slot.range.clone()]))
    }

    /// Size of the serialized form.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        2 + self.slots.len() * ENTRY_HEADER_SIZE + self.data.len()
    }

    /// Serializes the set.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::MetadataOverflow`] if the set cannot be encoded.
    pub fn serialize(&self) -> GclResult<Vec<u8>> {
        let count = u16::try_from(self.slots.len())
            .map_err(|_| GclError::metadata_overflow("entry count exceeds 16 bits"))?;
        let mut buf = Vec::with_capacity(self.serialized_len());
        buf.extend_from_slice(&count.to_be_bytes());
        buf.extend_from_slice(&self.entry_headers()?);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    /// Serializes only the `(id, length)` header array.
    pub(crate) fn entry_headers(&self) -> GclResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.slots.len() * ENTRY_HEADER_SIZE);
        for slot in &self.slots {
            let len = slot.range.len();
            if len > MAX_ENTRY_LEN {
                return Err(GclError::metadata_overflow(format!(
                    "entry {:#010x} is {len} bytes",
                    slot.id
                )));
            }
            buf.extend_from_slice(&slot.id.to_be_bytes());
            buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        Ok(buf)
    }

    /// Concatenated entry data.
    pub(crate) fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// Deserializes a set. The result is read-only.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::MetadataTruncated`],
    /// [`GclError::MetadataHeaderTruncated`] or
    /// [`GclError::MetadataDataTruncated`] if `bytes` is too short.
    pub fn deserialize(bytes: &[u8]) -> GclResult<Self> {
        Self::deserialize_prefix(bytes).map(|(set, _)| set)
    }

    /// Deserializes a set from the start of `bytes` and returns the number
    /// of bytes consumed.
    ///
    /// # Errors
    ///
    /// Same as [`MetadataSet::deserialize`].
    pub fn deserialize_prefix(bytes: &[u8]) -> GclResult<(Self, usize)> {
        if bytes.len() < 2 {
            return Err(GclError::MetadataTruncated { have: bytes.len() });
        }
        let count = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
        let lengths = parse_entry_headers(count, &bytes[2..])?;
        let header_end = 2 + count * ENTRY_HEADER_SIZE;
        let total = data_len(&lengths);
        let have = bytes.len() - header_end;
        if total > have as u64 {
            return Err(GclError::MetadataDataTruncated {
                declared: total,
                have,
            });
        }
        let data_end = header_end + total as usize;
        let set = Self::from_parts(&lengths, bytes[header_end..data_end].to_vec())?;
        Ok((set, data_end))
    }

    /// Reassembles a read-only set from a parsed header array and its data.
    pub(crate) fn from_parts(headers: &[(u32, u32)], data: Vec<u8>) -> GclResult<Self> {
        let mut slots = Vec::with_capacity(headers.len().max(MIN_CAPACITY));
        let mut start = 0usize;
        for &(id, len) in headers {
            let end = start + len as usize;
            if end > data.len() {
                return Err(GclError::MetadataDataTruncated {
                    declared: data_len(headers),
                    have: data.len(),
                });
            }
            slots.push(Slot {
                id,
                range: start..end,
            });
            start = end;
        }
        Ok(Self {
            slots,
            data,
            read_only: true,
        })
    }
}

/// Parses `count` entry headers from the start of `bytes`.
pub(crate) fn parse_entry_headers(count: usize, bytes: &[u8]) -> GclResult<Vec<(u32, u32)>> {
    let need = count * ENTRY_HEADER_SIZE;
    if bytes.len() < need {
        return Err(GclError::MetadataHeaderTruncated {
            count,
            need,
            have: bytes.len(),
        });
    }
    let mut headers = Vec::with_capacity(count);
    for chunk in bytes[..need].chunks_exact(ENTRY_HEADER_SIZE) {
        let id = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let len = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        if len as usize > MAX_ENTRY_LEN {
            return Err(GclError::metadata_overflow(format!(
                "entry {id:#010x} declares {len} bytes"
            )));
        }
        headers.push((id, len));
    }
    Ok(headers)
}

/// Sum of the declared entry lengths.
pub(crate) fn data_len(headers: &[(u32, u32)]) -> u64 {
    headers.iter().map(|&(_, len)| u64::from(len)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetadataSet {
        let mut set = MetadataSet::new();
        set.add(ids::XID, b"my-log").unwrap();
        set.add(ids::CREATION_TIME, b"2024-01-01T00:00:00Z").unwrap();
        set.add(0x1234, b"").unwrap();
        set
    }

    #[test]
    fn new_set_has_minimum_capacity() {
        let set = MetadataSet::new();
        assert!(set.capacity() >= MIN_CAPACITY);
        assert!(set.is_empty());
        assert!(!set.is_read_only());
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut set = MetadataSet::new();
        for id in 1..=20u32 {
            set.add(id, &id.to_be_bytes()).unwrap();
        }
        assert_eq!(set.len(), 20);
        assert!(set.capacity() >= 20);
        assert_eq!(set.get(19).unwrap(), (20, &20u32.to_be_bytes()[..]));
    }

    #[test]
    fn end_of_list_is_ignored() {
        let mut set = MetadataSet::new();
        set.add(ids::XID, b"x").unwrap();
        set.add(ids::END_OF_LIST, b"ignored").unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn get_out_of_range() {
        let set = sample();
        assert!(matches!(
            set.get(3),
            Err(GclError::EntryNotFound { index: 3, count: 3 })
        ));
    }

    #[test]
    fn find_by_id() {
        let set = sample();
        assert_eq!(set.find(ids::XID), Some(&b"my-log"[..]));
        assert_eq!(set.find(0x1234), Some(&b""[..]));
        assert_eq!(set.find(ids::PUBKEY), None);
    }

    #[test]
    fn serialized_layout_groups_headers_first() {
        let mut set = MetadataSet::new();
        set.add(1, b"ab").unwrap();
        set.add(2, b"cde").unwrap();
        let bytes = set.serialize().unwrap();
        assert_eq!(
            bytes,
            vec![
                0, 2, //
                0, 0, 0, 1, 0, 0, 0, 2, //
                0, 0, 0, 2, 0, 0, 0, 3, //
                b'a', b'b', b'c', b'd', b'e',
            ]
        );
        assert_eq!(bytes.len(), set.serialized_len());
    }

    #[test]
    fn deserialized_set_is_read_only() {
        let set = sample();
        let mut copy = MetadataSet::deserialize(&set.serialize().unwrap()).unwrap();
        assert_eq!(copy, set);
        assert!(copy.is_read_only());
        assert!(matches!(copy.add(9, b"z"), Err(GclError::ReadOnly)));
    }

    #[test]
    fn empty_set_round_trips() {
        let bytes = MetadataSet::new().serialize().unwrap();
        assert_eq!(bytes, vec![0, 0]);
        let set = MetadataSet::deserialize(&bytes).unwrap();
        assert!(set.is_empty());
        assert!(set.is_read_only());
    }

    #[test]
    fn truncation_errors() {
        assert!(matches!(
            MetadataSet::deserialize(&[0]),
            Err(GclError::MetadataTruncated { have: 1 })
        ));

        let bytes = sample().serialize().unwrap();
        assert!(matches!(
            MetadataSet::deserialize(&bytes[..2 + 8]),
            Err(GclError::MetadataHeaderTruncated { count: 3, .. })
        ));
        assert!(matches!(
            MetadataSet::deserialize(&bytes[..bytes.len() - 1]),
            Err(GclError::MetadataDataTruncated { .. })
        ));
    }

    #[test]
    fn prefix_reports_consumed_bytes() {
        let mut bytes = sample().serialize().unwrap();
        let len = bytes.len();
        bytes.extend_from_slice(b"trailing");
        let (set, used) = MetadataSet::deserialize_prefix(&bytes).unwrap();
        assert_eq!(used, len);
        assert_eq!(set, sample());
    }

    #[test]
    fn oversize_entry_rejected() {
        let mut set = MetadataSet::new();
        let big = vec![0u8; MAX_ENTRY_LEN + 1];
        assert!(matches!(
            set.add(ids::PUBKEY, &big),
            Err(GclError::MetadataOverflow { .. })
        ));
    }
}
