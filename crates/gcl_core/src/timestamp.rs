//! Timestamps with clock uncertainty.

use crate::error::{GclError, GclResult};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Encoded size of a timestamp: seconds(8) + nanoseconds(4) + accuracy(4).
pub const TIMESTAMP_SIZE: usize = 16;

/// An instant plus the advisory uncertainty of the clock that produced it.
///
/// Ordering compares the instant first; `accuracy_ns` only breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Seconds since the Unix epoch. Negative before 1970.
    pub seconds: i64,
    /// Nanoseconds within the second, `[0, 1e9)`.
    pub nanoseconds: u32,
    /// Clock uncertainty in nanoseconds. Not validated against the instant.
    pub accuracy_ns: u32,
}

impl Timestamp {
    /// Creates a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::InvalidTimestamp`] if `nanoseconds >= 1e9`.
    pub fn new(seconds: i64, nanoseconds: u32, accuracy_ns: u32) -> GclResult<Self> {
        if nanoseconds >= NANOS_PER_SEC {
            return Err(GclError::InvalidTimestamp { nanoseconds });
        }
        Ok(Self {
            seconds,
            nanoseconds,
            accuracy_ns,
        })
    }

    /// Returns the current wall-clock time with unknown accuracy.
    #[must_use]
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            seconds: now.timestamp(),
            // A leap second is folded into the last nanosecond of its minute.
            nanoseconds: now.timestamp_subsec_nanos().min(NANOS_PER_SEC - 1),
            accuracy_ns: 0,
        }
    }

    /// Returns a copy with the given accuracy.
    #[must_use]
    pub const fn with_accuracy(mut self, accuracy_ns: u32) -> Self {
        self.accuracy_ns = accuracy_ns;
        self
    }

    /// Big-endian encoding used both on disk and on the wire.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; TIMESTAMP_SIZE] {
        let mut out = [0u8; TIMESTAMP_SIZE];
        out[0..8].copy_from_slice(&self.seconds.to_be_bytes());
        out[8..12].copy_from_slice(&self.nanoseconds.to_be_bytes());
        out[12..16].copy_from_slice(&self.accuracy_ns.to_be_bytes());
        out
    }

    /// Decodes the big-endian form.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::InvalidTimestamp`] if the nanosecond field is out
    /// of range.
    pub fn from_bytes(bytes: &[u8; TIMESTAMP_SIZE]) -> GclResult<Self> {
        let mut seconds = [0u8; 8];
        let mut nanos = [0u8; 4];
        let mut accuracy = [0u8; 4];
        seconds.copy_from_slice(&bytes[0..8]);
        nanos.copy_from_slice(&bytes[8..12]);
        accuracy.copy_from_slice(&bytes[12..16]);
        Self::new(
            i64::from_be_bytes(seconds),
            u32::from_be_bytes(nanos),
            u32::from_be_bytes(accuracy),
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.seconds, self.nanoseconds) {
            Some(utc) => f.write_str(&utc.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            // Outside chrono's calendar range.
            None => write!(f, "@{}.{:09}", self.seconds, self.nanoseconds),
        }
    }
}
