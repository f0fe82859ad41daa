//! In-memory storage backend.

use crate::backend::{check_span, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// Used for unit tests, for logs that never need to survive the process,
/// and for simulating crashes by handing a store a pre-built byte image via
/// [`InMemoryBackend::with_data`].
///
/// # Example
///
/// ```rust
/// use gcl_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding an existing byte image, such as a log file
    /// cut short by a crash.
    #[must_use]
    pub fn with_data(image: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(image),
        }
    }

    /// Copy of the stored image.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let end = check_span(offset, len, bytes.len() as u64)?;
        Ok(bytes[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let bytes = self.bytes.get_mut();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let bytes = self.bytes.get_mut();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        bytes.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"de").unwrap(), 3);
        assert_eq!(backend.size().unwrap(), 5);
    }

    #[test]
    fn read_range() {
        let backend = InMemoryBackend::with_data(b"0123456789".to_vec());
        assert_eq!(&backend.read_at(2, 3).unwrap(), b"234");
        assert!(backend.read_at(8, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        assert!(matches!(
            backend.read_at(2, 5),
            Err(StorageError::ReadPastEnd { size: 3, .. })
        ));
        assert!(backend.read_at(4, 0).is_err());
    }

    #[test]
    fn truncate_then_append() {
        let mut backend = InMemoryBackend::with_data(b"header+partial".to_vec());
        backend.truncate(6).unwrap();
        backend.append(b"!").unwrap();
        assert_eq!(backend.data(), b"header!".to_vec());
    }

    #[test]
    fn truncate_beyond_end_fails() {
        let mut backend = InMemoryBackend::with_data(vec![0; 4]);
        assert!(matches!(
            backend.truncate(5),
            Err(StorageError::TruncateBeyondEnd { requested: 5, size: 4 })
        ));
    }
}
