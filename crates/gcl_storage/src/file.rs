//! File-based storage backend.

use crate::backend::{check_span, StorageBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend: one file per log.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_data()` so appended records reach the disk
/// - `truncate()` syncs the new length before returning
///
/// # Locking
///
/// [`FileBackend::create_new`] takes an exclusive advisory lock while the
/// caller writes the log header; [`FileBackend::unlock`] releases it.
///
/// # Example
///
/// ```no_run
/// use gcl_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create_new(Path::new("log.gcl")).unwrap();
/// backend.append(b"header bytes").unwrap();
/// backend.sync().unwrap();
/// backend.unlock().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<OpenFile>,
}

/// The file and the length of its valid contents. Reads and writes seek the
/// shared cursor, so both live under one lock.
#[derive(Debug)]
struct OpenFile {
    file: File,
    len: u64,
}

impl OpenFile {
    fn write_at_end(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(offset)
    }
}

impl FileBackend {
    /// Opens the file at `path`, creating an empty one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut options = Self::options();
        options.create(true).truncate(false);
        Self::with_options(path, &options)
    }

    /// Opens a file that must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no file at `path`.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        Self::with_options(path, &Self::options())
    }

    /// Creates a brand-new file, failing if one already exists, and takes an
    /// exclusive lock on it. Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the file exists and
    /// [`StorageError::Locked`] if the lock cannot be taken.
    pub fn create_new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let backend = Self::with_options(path, Self::options().create_new(true))?;
        backend
            .inner
            .lock()
            .file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked(path.to_path_buf()))?;
        Ok(backend)
    }

    fn options() -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        options
    }

    fn with_options(path: &Path, options: &OpenOptions) -> StorageResult<Self> {
        let file = options.open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_path_buf()),
            ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_path_buf()),
            _ => StorageError::Io(e),
        })?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(OpenFile { file, len }),
        })
    }

    /// Releases the advisory lock taken by [`FileBackend::create_new`].
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be released.
    pub fn unlock(&self) -> StorageResult<()> {
        FileExt::unlock(&self.inner.lock().file)?;
        Ok(())
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        check_span(offset, len, inner.len)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        if data.is_empty() {
            return Ok(inner.len);
        }
        inner.write_at_end(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: inner.len,
            });
        }
        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.gcl");
        (dir, path)
    }

    #[test]
    fn open_creates_empty_file() {
        let (_dir, path) = scratch();
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_at(0, 0).unwrap().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn appends_return_offsets() {
        let (_dir, path) = scratch();
        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.append(b"header").unwrap(), 0);
        assert_eq!(backend.append(b"rec1").unwrap(), 6);
        assert_eq!(backend.append(b"").unwrap(), 10);
        assert_eq!(backend.read_at(6, 4).unwrap(), b"rec1");
        assert!(matches!(
            backend.read_at(8, 4),
            Err(StorageError::ReadPastEnd { size: 10, .. })
        ));
        assert!(matches!(
            backend.read_at(u64::MAX, 2),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn create_new_locks_and_refuses_existing() {
        let (dir, _) = scratch();
        let path = dir.path().join("logs").join("new.gcl");

        let backend = FileBackend::create_new(&path).unwrap();
        assert_eq!(backend.path(), path);
        backend.unlock().unwrap();
        drop(backend);

        assert!(matches!(
            FileBackend::create_new(&path),
            Err(StorageError::AlreadyExists(_))
        ));
        assert!(matches!(
            FileBackend::open_existing(&dir.path().join("absent.gcl")),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn reopen_sees_synced_tail() {
        let (_dir, path) = scratch();
        {
            let mut backend = FileBackend::create_new(&path).unwrap();
            backend.append(b"preamble").unwrap();
            backend.append(b"record").unwrap();
            backend.sync().unwrap();
            backend.unlock().unwrap();
        }
        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 14);
        assert_eq!(backend.read_at(8, 6).unwrap(), b"record");
    }

    #[test]
    fn truncate_cuts_torn_record() {
        let (_dir, path) = scratch();
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"whole").unwrap();
        backend.append(b"tor").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.append(b"next").unwrap(), 5);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"wholenext");
        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { requested: 100, size: 9 })
        ));

        drop(backend);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 9);
    }
}
