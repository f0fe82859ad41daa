//! # GCL Testkit
//!
//! Test utilities for GCL.
//!
//! This crate provides:
//! - Log fixtures on temporary files or memory
//! - Property-based test generators using proptest
//! - A replication harness driven by a mock transport
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gcl_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_log() {
//!     with_temp_log(|log| {
//!         let recno = log.append(b"hello", Timestamp::now()).unwrap();
//!         assert_eq!(recno, 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod replication;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::replication::*;
}

pub use fixtures::*;
pub use generators::*;
pub use replication::*;
