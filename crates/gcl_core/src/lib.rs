//! # GCL Core
//!
//! The data model and local storage of a GCL (Generic Channel/Log): an
//! append-only, strictly ordered sequence of immutable records.
//!
//! This crate provides:
//! - [`Name`]: 256-bit log and server identities
//! - [`Timestamp`]: instants with clock uncertainty
//! - [`RecordCodec`]: the on-disk record layout
//! - [`MetadataSet`]: typed entries attached to a log at creation
//! - [`IndexCache`]: a ring buffer of `recno -> offset` hints
//! - [`LogStore`]: one log file with append, read and subscribe
//!
//! ## Example
//!
//! ```rust
//! use gcl_core::{LogStore, MetadataSet, Name, StoreConfig, Timestamp, metadata::ids};
//!
//! let mut meta = MetadataSet::new();
//! meta.add(ids::XID, b"sensor-feed").unwrap();
//!
//! let store = LogStore::in_memory(Name::parse("sensor-feed"), &meta, &StoreConfig::default()).unwrap();
//! let recno = store.append(b"21.5C", Timestamp::now()).unwrap();
//! assert_eq!(recno, 1);
//! assert_eq!(store.metadata().find(ids::XID), Some(&b"sensor-feed"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod index_cache;
mod log;
pub mod metadata;
mod name;
mod record;
mod sign;
mod timestamp;

pub use config::{StoreConfig, LOG_FILE_EXTENSION};
pub use error::{ErrorKind, GclError, GclResult};
pub use index_cache::{IndexCache, IndexEntry, DEFAULT_INDEX_CAPACITY};
pub use log::{
    LogHeader, LogStore, Subscription, SubscriptionEvent, LOG_FORMAT_VERSION, LOG_HEADER_SIZE,
    LOG_MAGIC, LOG_TYPE_DEFAULT,
};
pub use metadata::MetadataSet;
pub use name::{LogIdentity, Name, ServerId, NAME_LEN, PRINTABLE_LEN};
pub use record::{
    LogRecord, RecordCodec, RecordHeader, DEFAULT_MAX_RECORD_SIZE, RECORD_HEADER_SIZE,
};
pub use sign::{signing_input, DigestVerifier, RecordVerifier, Sha256Digest, SignaturePolicy};
pub use timestamp::{Timestamp, TIMESTAMP_SIZE};
