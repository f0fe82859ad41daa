//! # GCL Storage
//!
//! Byte-store backends underneath GCL log files.
//!
//! A backend is an **opaque, append-only byte store**: it knows how to read a
//! range, append at the end, flush and truncate, and nothing else. The log
//! header, metadata block and record stream are all interpreted one layer up
//! in `gcl_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral logs
//! - [`FileBackend`] - one file per log, using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use gcl_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
