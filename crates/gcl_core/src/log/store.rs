//! Durable append-only storage for one log.

use super::header::{LogHeader, LOG_HEADER_SIZE};
use super::subscription::Subscription;
use crate::config::StoreConfig;
use crate::error::{GclError, GclResult};
use crate::index_cache::IndexCache;
use crate::metadata::{self, MetadataSet, ENTRY_HEADER_SIZE};
use crate::name::LogIdentity;
use crate::record::{LogRecord, RecordCodec, RecordHeader, RECORD_HEADER_SIZE};
use crate::timestamp::Timestamp;
use gcl_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Writer-side state, guarded by one mutex so `recno = last_recno + 1`
/// holds across concurrent appends.
struct StoreState {
    backend: Box<dyn StorageBackend>,
    last_recno: u64,
    closed: bool,
}

/// Outcome of waiting for a record to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Available,
    Closed,
    TimedOut,
}

/// One log: header, read-only metadata and the record stream.
///
/// File layout:
///
/// ```text
/// LogHeader | { id(4) | length(4) } * count | metadata data | record*
/// ```
///
/// # Thread Safety
///
/// `LogStore` is `Send + Sync`. Appends are serialized internally; reads
/// may run from any thread. Wrap the store in an [`Arc`] to subscribe.
///
/// # Example
///
/// ```rust
/// use gcl_core::{LogStore, MetadataSet, Name, StoreConfig, Timestamp};
///
/// let store = LogStore::in_memory(Name::parse("demo"), &MetadataSet::new(), &StoreConfig::default()).unwrap();
/// assert_eq!(store.append(b"hello", Timestamp::now()).unwrap(), 1);
/// assert_eq!(store.read(1).unwrap().payload, b"hello");
/// ```
pub struct LogStore {
    identity: LogIdentity,
    header: LogHeader,
    metadata: MetadataSet,
    codec: RecordCodec,
    sync_on_append: bool,
    data_start: u64,
    state: Mutex<StoreState>,
    index: RwLock<IndexCache>,
    appended: Condvar,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("identity", &self.identity)
            .field("last_recno", &self.last_recno())
            .finish_non_exhaustive()
    }
}

impl LogStore {
    /// Creates a new log file under `config.log_dir`.
    ///
    /// The file is locked while the header and metadata are written.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::AlreadyExists`] if the log file exists,
    /// [`GclError::MetadataOverflow`] if the metadata cannot be encoded, or
    /// an I/O error.
    pub fn create(
        config: &StoreConfig,
        identity: LogIdentity,
        metadata: &MetadataSet,
    ) -> GclResult<Self> {
        let path = config.log_path(&identity);
        let preamble = Self::preamble(&identity, metadata)?;

        let mut backend = FileBackend::create_new(&path).map_err(|e| match e {
            StorageError::AlreadyExists(_) => GclError::AlreadyExists {
                name: identity.printable(),
            },
            other => other.into(),
        })?;
        let written = backend
            .append(&preamble.bytes)
            .and_then(|_| backend.sync())
            .and_then(|()| backend.unlock());
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "log create failed, removing file");
            drop(backend);
            if let Err(remove) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %remove, "could not remove partial log");
            }
            return Err(e.into());
        }

        info!(log = %identity, path = %path.display(), "created log");
        Self::from_preamble(identity, preamble, Box::new(backend), config)
    }

    /// Creates a log on an empty backend.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::AlreadyExists`] if the backend is not empty,
    /// [`GclError::MetadataOverflow`] if the metadata cannot be encoded, or
    /// a storage error.
    pub fn create_with_backend(
        identity: LogIdentity,
        metadata: &MetadataSet,
        mut backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
    ) -> GclResult<Self> {
        if backend.size()? != 0 {
            return Err(GclError::AlreadyExists {
                name: identity.printable(),
            });
        }
        let preamble = Self::preamble(&identity, metadata)?;
        backend.append(&preamble.bytes)?;
        backend.sync()?;
        debug!(log = %identity, "created log on supplied backend");
        Self::from_preamble(identity, preamble, backend, config)
    }

    /// Creates a log held entirely in memory.
    ///
    /// # Errors
    ///
    /// Same as [`LogStore::create_with_backend`].
    pub fn in_memory(
        identity: LogIdentity,
        metadata: &MetadataSet,
        config: &StoreConfig,
    ) -> GclResult<Self> {
        Self::create_with_backend(identity, metadata, Box::new(InMemoryBackend::new()), config)
    }

    /// Opens an existing log file under `config.log_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::LogNotFound`] if there is no such log,
    /// [`GclError::BadMagic`] or [`GclError::UnsupportedVersion`] for a bad
    /// header, or [`GclError::Corrupt`] if the record stream is damaged.
    pub fn open(config: &StoreConfig, identity: LogIdentity) -> GclResult<Self> {
        let path = config.log_path(&identity);
        let backend = FileBackend::open_existing(&path).map_err(|e| match e {
            StorageError::NotFound(_) => GclError::LogNotFound {
                name: identity.printable(),
            },
            other => other.into(),
        })?;
        Self::open_with_backend(identity, Box::new(backend), config)
    }

    /// Opens a log from an existing backend, recovering from a torn final
    /// record.
    ///
    /// # Errors
    ///
    /// Same as [`LogStore::open`].
    pub fn open_with_backend(
        identity: LogIdentity,
        mut backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
    ) -> GclResult<Self> {
        let size = backend.size()?;
        let header = LogHeader::decode(&read_span(&*backend, 0, LOG_HEADER_SIZE as u64, size)?)?;

        let count = header.entry_count();
        let headers_at = header.header_size as u64;
        let header_bytes =
            read_span(&*backend, headers_at, (count * ENTRY_HEADER_SIZE) as u64, size)?;
        let entries = metadata::parse_entry_headers(count, &header_bytes)?;
        let data_at = headers_at + header_bytes.len() as u64;
        let data_len = metadata::data_len(&entries);
        let data = read_span(&*backend, data_at, data_len, size)?;
        let metadata = MetadataSet::from_parts(&entries, data)?;
        let data_start = data_at + data_len;

        let mut index = IndexCache::new(config.index_cache_capacity)?;
        let max_len = config.max_record_size as u64;
        let (last_recno, end) = scan_records(&*backend, data_start, size, max_len, &mut index)?;
        if end < size {
            warn!(
                log = %identity,
                offset = end,
                dropped = size - end,
                "truncating partially written record"
            );
            backend.truncate(end)?;
        }

        info!(log = %identity, last_recno, "opened log");
        Ok(Self {
            identity,
            header,
            metadata,
            codec: RecordCodec::new(config.max_record_size),
            sync_on_append: config.sync_on_append,
            data_start,
            state: Mutex::new(StoreState {
                backend,
                last_recno,
                closed: false,
            }),
            index: RwLock::new(index),
            appended: Condvar::new(),
        })
    }

    fn preamble(identity: &LogIdentity, metadata: &MetadataSet) -> GclResult<Preamble> {
        if !identity.is_valid() {
            return Err(GclError::invalid_argument("log identity is all zeros"));
        }
        let header = LogHeader::new(metadata.len())?;
        let entry_headers = metadata.entry_headers()?;
        let mut bytes = Vec::with_capacity(
            LOG_HEADER_SIZE + entry_headers.len() + metadata.raw_data().len(),
        );
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(&entry_headers);
        bytes.extend_from_slice(metadata.raw_data());
        let metadata = MetadataSet::deserialize(&metadata.serialize()?)?;
        Ok(Preamble {
            header,
            metadata,
            bytes,
        })
    }

    fn from_preamble(
        identity: LogIdentity,
        preamble: Preamble,
        backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
    ) -> GclResult<Self> {
        Ok(Self {
            identity,
            header: preamble.header,
            metadata: preamble.metadata,
            codec: RecordCodec::new(config.max_record_size),
            sync_on_append: config.sync_on_append,
            data_start: preamble.bytes.len() as u64,
            state: Mutex::new(StoreState {
                backend,
                last_recno: 0,
                closed: false,
            }),
            index: RwLock::new(IndexCache::new(config.index_cache_capacity)?),
            appended: Condvar::new(),
        })
    }

    /// Appends a record and returns its record number.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::EncodeOverflow`] if the payload is too large,
    /// [`GclError::Closed`] after [`LogStore::close`], or a storage error.
    pub fn append(&self, payload: &[u8], timestamp: Timestamp) -> GclResult<u64> {
        self.append_checked(None, payload, timestamp)
    }

    /// Appends a record whose number the writer has already chosen.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::RecnoMismatch`] if `recno` is not
    /// `last_recno + 1`, otherwise as [`LogStore::append`].
    pub fn append_at(&self, recno: u64, payload: &[u8], timestamp: Timestamp) -> GclResult<u64> {
        self.append_checked(Some(recno), payload, timestamp)
    }

    fn append_checked(
        &self,
        expected: Option<u64>,
        payload: &[u8],
        timestamp: Timestamp,
    ) -> GclResult<u64> {
        self.codec.check_size(payload.len())?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(GclError::Closed);
        }
        let recno = state.last_recno + 1;
        if let Some(actual) = expected {
            if actual != recno {
                return Err(GclError::RecnoMismatch {
                    actual,
                    last_recno: state.last_recno,
                });
            }
        }

        let mut buf = Vec::new();
        self.codec.encode_parts(recno, &timestamp, payload, &mut buf)?;

        let end = state.backend.size()?;
        let written = state.backend.append(&buf).and_then(|offset| {
            if self.sync_on_append {
                state.backend.sync()?;
            } else {
                state.backend.flush()?;
            }
            Ok(offset)
        });
        let offset = match written {
            Ok(offset) => offset,
            Err(e) => {
                warn!(log = %self.identity, recno, error = %e, "append failed, rolling back");
                if let Err(rollback) = state.backend.truncate(end) {
                    warn!(log = %self.identity, error = %rollback, "rollback failed");
                }
                return Err(e.into());
            }
        };

        state.last_recno = recno;
        self.index.write().append(recno, offset)?;
        drop(state);
        self.appended.notify_all();

        debug!(log = %self.identity, recno, offset, len = payload.len(), "appended record");
        Ok(recno)
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::RecordNotFound`] if `recno` is 0 or past the end,
    /// or [`GclError::Corrupt`] if the record stream cannot be decoded.
    pub fn read(&self, recno: u64) -> GclResult<LogRecord> {
        let mut records = self.read_range(recno, 1)?;
        records.pop().ok_or(GclError::RecordNotFound {
            recno,
            last_recno: self.last_recno(),
        })
    }

    /// Reads up to `count` consecutive records starting at `from`.
    /// A `count` of 0 reads to the end of the log.
    ///
    /// # Errors
    ///
    /// Same as [`LogStore::read`] for the first record.
    pub fn read_range(&self, from: u64, count: u64) -> GclResult<Vec<LogRecord>> {
        let state = self.state.lock();
        let last_recno = state.last_recno;
        if from == 0 || from > last_recno {
            return Err(GclError::RecordNotFound {
                recno: from,
                last_recno,
            });
        }
        let until = if count == 0 {
            last_recno
        } else {
            from.saturating_add(count - 1).min(last_recno)
        };

        let (mut current, mut pos) = match self.index.read().floor(from) {
            Some(entry) => (entry.key, entry.value),
            None => (1, self.data_start),
        };

        let backend = &*state.backend;
        let mut records = Vec::with_capacity((until - from + 1).min(1024) as usize);
        while current <= until {
            let header = read_record_header(backend, pos)?;
            if header.recno != current {
                return Err(GclError::corrupt(format!(
                    "record at offset {pos} has recno {}, expected {current}",
                    header.recno
                )));
            }
            if header.data_length > self.codec.max_record_size() as u64 {
                return Err(GclError::corrupt(format!(
                    "record {current} declares {} bytes",
                    header.data_length
                )));
            }
            if current >= from {
                let len = usize::try_from(header.data_length)
                    .map_err(|_| GclError::corrupt("record length exceeds address space"))?;
                let payload = backend
                    .read_at(pos + RECORD_HEADER_SIZE as u64, len)
                    .map_err(|e| GclError::corrupt(format!("record {current}: {e}")))?;
                records.push(LogRecord::new(current, header.timestamp, payload));
            }
            pos += header.record_len()?;
            current += 1;
        }
        Ok(records)
    }

    /// Starts a subscription at `from_recno` (0 is treated as 1).
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, from_recno: u64) -> Subscription {
        Subscription::new(Arc::clone(self), from_recno.max(1))
    }

    /// Blocks until `recno` exists, the log closes, or `deadline` passes.
    pub(crate) fn wait_for(&self, recno: u64, deadline: Option<Instant>) -> WaitOutcome {
        let mut state = self.state.lock();
        loop {
            if recno <= state.last_recno {
                return WaitOutcome::Available;
            }
            if state.closed {
                return WaitOutcome::Closed;
            }
            match deadline {
                None => self.appended.wait(&mut state),
                Some(deadline) => {
                    if self.appended.wait_until(&mut state, deadline).timed_out() {
                        if recno <= state.last_recno {
                            return WaitOutcome::Available;
                        }
                        if state.closed {
                            return WaitOutcome::Closed;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
            }
        }
    }

    /// Closes the log: later appends fail and subscribers see the end marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails. The log is closed anyway.
    pub fn close(&self) -> GclResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let synced = state.backend.sync();
        drop(state);
        self.appended.notify_all();
        info!(log = %self.identity, "closed log");
        synced.map_err(Into::into)
    }

    /// Returns true once [`LogStore::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Highest record number, 0 for an empty log.
    #[must_use]
    pub fn last_recno(&self) -> u64 {
        self.state.lock().last_recno
    }

    /// The log's identity.
    #[must_use]
    pub fn identity(&self) -> &LogIdentity {
        &self.identity
    }

    /// The log header.
    #[must_use]
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// The read-only metadata attached at creation.
    #[must_use]
    pub fn metadata(&self) -> &MetadataSet {
        &self.metadata
    }

    /// Largest accepted payload.
    #[must_use]
    pub fn max_record_size(&self) -> usize {
        self.codec.max_record_size()
    }

    /// Number of offsets currently cached.
    #[must_use]
    pub fn cached_offsets(&self) -> usize {
        self.index.read().len()
    }

    /// Size of the log file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> GclResult<u64> {
        Ok(self.state.lock().backend.size()?)
    }
}

struct Preamble {
    header: LogHeader,
    metadata: MetadataSet,
    bytes: Vec<u8>,
}

/// Reads `len` bytes at `offset`, reporting a short file as corruption.
fn read_span(
    backend: &dyn StorageBackend,
    offset: u64,
    len: u64,
    size: u64,
) -> GclResult<Vec<u8>> {
    if offset.saturating_add(len) > size {
        return Err(GclError::corrupt(format!(
            "log file is {size} bytes, preamble needs {}",
            offset.saturating_add(len)
        )));
    }
    let len = usize::try_from(len).map_err(|_| GclError::corrupt("preamble too large"))?;
    Ok(backend.read_at(offset, len)?)
}

fn read_record_header(backend: &dyn StorageBackend, pos: u64) -> GclResult<RecordHeader> {
    let bytes = backend
        .read_at(pos, RECORD_HEADER_SIZE)
        .map_err(|e| GclError::corrupt(format!("record header at offset {pos}: {e}")))?;
    RecordHeader::parse(&bytes)
        .map_err(|e| GclError::corrupt(format!("record header at offset {pos}: {e}")))
}

/// Walks the record stream, filling `index`. Returns the last complete
/// record number and the offset just past it.
fn scan_records(
    backend: &dyn StorageBackend,
    start: u64,
    size: u64,
    max_len: u64,
    index: &mut IndexCache,
) -> GclResult<(u64, u64)> {
    let mut pos = start;
    let mut last = 0u64;
    while pos < size {
        if size - pos < RECORD_HEADER_SIZE as u64 {
            break;
        }
        let header = read_record_header(backend, pos)?;
        if header.recno != last + 1 {
            return Err(GclError::corrupt(format!(
                "record at offset {pos} has recno {}, expected {}",
                header.recno,
                last + 1
            )));
        }
        if header.data_length > max_len {
            return Err(GclError::corrupt(format!(
                "record {} at offset {pos} declares {} bytes, limit is {max_len}",
                header.recno, header.data_length
            )));
        }
        let len = header.record_len()?;
        // A short final record is a torn write, not corruption.
        if len > size - pos {
            break;
        }
        index.append(header.recno, pos)?;
        last = header.recno;
        pos += len;
    }
    Ok((last, pos))
}
