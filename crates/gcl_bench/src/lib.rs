//! Shared helpers for the GCL benchmarks.

pub mod utils;
