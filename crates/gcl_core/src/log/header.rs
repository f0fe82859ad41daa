//! Fixed header at the start of every log file.

use crate::error::{GclError, GclResult};

/// Magic number identifying a GCL log file (`\x07GCL1` plus format tag).
pub const LOG_MAGIC: u64 = 0x0747_434C_3100_0001;

/// Newest on-disk format version this implementation reads and writes.
pub const LOG_FORMAT_VERSION: i64 = 1;

/// Encoded size of [`LogHeader`].
pub const LOG_HEADER_SIZE: usize = 8 + 8 + 2 + 2 + 2;

/// Default log type. Other values are reserved.
pub const LOG_TYPE_DEFAULT: i16 = 0;

/// Header written once when a log file is created.
///
/// `header_size` is the offset of the metadata block, so later versions can
/// extend the header without moving what follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Always [`LOG_MAGIC`].
    pub magic: u64,
    /// On-disk format version.
    pub version: i64,
    /// Offset of the metadata block.
    pub header_size: i16,
    /// Log type, currently [`LOG_TYPE_DEFAULT`].
    pub log_type: i16,
    /// Number of metadata entries following the header.
    pub metadata_entry_count: i16,
}

impl LogHeader {
    /// Creates a current-version header for `entry_count` metadata entries.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::MetadataOverflow`] if the count does not fit the
    /// 16-bit signed header field.
    pub fn new(entry_count: usize) -> GclResult<Self> {
        let metadata_entry_count = i16::try_from(entry_count).map_err(|_| {
            GclError::metadata_overflow(format!(
                "{entry_count} metadata entries exceed the log header limit of {}",
                i16::MAX
            ))
        })?;
        Ok(Self {
            magic: LOG_MAGIC,
            version: LOG_FORMAT_VERSION,
            header_size: LOG_HEADER_SIZE as i16,
            log_type: LOG_TYPE_DEFAULT,
            metadata_entry_count,
        })
    }

    /// Big-endian encoding.
    #[must_use]
    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE] {
        let mut out = [0u8; LOG_HEADER_SIZE];
        out[0..8].copy_from_slice(&self.magic.to_be_bytes());
        out[8..16].copy_from_slice(&self.version.to_be_bytes());
        out[16..18].copy_from_slice(&self.header_size.to_be_bytes());
        out[18..20].copy_from_slice(&self.log_type.to_be_bytes());
        out[20..22].copy_from_slice(&self.metadata_entry_count.to_be_bytes());
        out
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::BadMagic`], [`GclError::UnsupportedVersion`] or
    /// [`GclError::Corrupt`] if the header is not usable.
    pub fn decode(bytes: &[u8]) -> GclResult<Self> {
        if bytes.len() < LOG_HEADER_SIZE {
            return Err(GclError::corrupt(format!(
                "log header is {} bytes, need {LOG_HEADER_SIZE}",
                bytes.len()
            )));
        }
        let mut u64_buf = [0u8; 8];
        u64_buf.copy_from_slice(&bytes[0..8]);
        let magic = u64::from_be_bytes(u64_buf);
        if magic != LOG_MAGIC {
            return Err(GclError::BadMagic {
                found: magic,
                expected: LOG_MAGIC,
            });
        }
        u64_buf.copy_from_slice(&bytes[8..16]);
        let version = i64::from_be_bytes(u64_buf);
        if !(1..=LOG_FORMAT_VERSION).contains(&version) {
            return Err(GclError::UnsupportedVersion {
                found: version,
                supported: LOG_FORMAT_VERSION,
            });
        }
        let header = Self {
            magic,
            version,
            header_size: i16::from_be_bytes([bytes[16], bytes[17]]),
            log_type: i16::from_be_bytes([bytes[18], bytes[19]]),
            metadata_entry_count: i16::from_be_bytes([bytes[20], bytes[21]]),
        };
        if (header.header_size as i32) < LOG_HEADER_SIZE as i32 {
            return Err(GclError::corrupt(format!(
                "header size {} smaller than {LOG_HEADER_SIZE}",
                header.header_size
            )));
        }
        if header.metadata_entry_count < 0 {
            return Err(GclError::corrupt(format!(
                "negative metadata entry count {}",
                header.metadata_entry_count
            )));
        }
        Ok(header)
    }

    /// Metadata entry count as an unsigned value.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        usize::try_from(self.metadata_entry_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let header = LogHeader::new(3).unwrap();
        let decoded = LogHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.entry_count(), 3);
        assert_eq!(decoded.header_size as usize, LOG_HEADER_SIZE);
    }

    #[test]
    fn bad_magic() {
        let mut bytes = LogHeader::new(0).unwrap().encode();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            LogHeader::decode(&bytes),
            Err(GclError::BadMagic { .. })
        ));
    }

    #[test]
    fn newer_version_rejected() {
        let mut header = LogHeader::new(0).unwrap();
        header.version = LOG_FORMAT_VERSION + 1;
        assert!(matches!(
            LogHeader::decode(&header.encode()),
            Err(GclError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn short_header_is_corrupt() {
        let bytes = LogHeader::new(0).unwrap().encode();
        assert!(matches!(
            LogHeader::decode(&bytes[..10]),
            Err(GclError::Corrupt { .. })
        ));
    }

    #[test]
    fn too_many_entries() {
        assert!(LogHeader::new(i16::MAX as usize).is_ok());
        assert!(matches!(
            LogHeader::new(i16::MAX as usize + 1),
            Err(GclError::MetadataOverflow { .. })
        ));
    }
}
