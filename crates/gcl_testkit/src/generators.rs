//! Property-based test generators using proptest.

use gcl_core::{LogRecord, MetadataSet, Name, Timestamp};
use gcl_protocol::{Command, Packet};
use proptest::prelude::*;

/// Strategy for arbitrary 32-byte names.
pub fn name_strategy() -> impl Strategy<Value = Name> {
    prop::array::uniform32(any::<u8>()).prop_map(Name::from_bytes)
}

/// Strategy for valid timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (any::<i64>(), 0u32..1_000_000_000, any::<u32>()).prop_map(|(seconds, nanoseconds, accuracy)| {
        Timestamp {
            seconds,
            nanoseconds,
            accuracy_ns: accuracy,
        }
    })
}

/// Strategy for record payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for unsigned records.
pub fn record_strategy() -> impl Strategy<Value = LogRecord> {
    (1u64..u64::MAX, timestamp_strategy(), payload_strategy())
        .prop_map(|(recno, timestamp, payload)| LogRecord::new(recno, timestamp, payload))
}

/// Strategy for metadata entries with non-reserved ids.
pub fn metadata_entries_strategy() -> impl Strategy<Value = Vec<(u32, Vec<u8>)>> {
    prop::collection::vec(
        (1u32..=u32::MAX, prop::collection::vec(any::<u8>(), 0..64)),
        0..12,
    )
}

/// Builds a metadata set from entries.
///
/// # Panics
///
/// Panics if an entry is rejected, which generated entries never are.
#[must_use]
pub fn metadata_from(entries: &[(u32, Vec<u8>)]) -> MetadataSet {
    let mut set = MetadataSet::new();
    for (id, data) in entries {
        set.add(*id, data).expect("generated entry fits");
    }
    set
}

/// Strategy for metadata sets.
pub fn metadata_strategy() -> impl Strategy<Value = MetadataSet> {
    metadata_entries_strategy().prop_map(|entries| metadata_from(&entries))
}

/// Strategy for packets with any combination of optional fields.
pub fn packet_strategy() -> impl Strategy<Value = Packet> {
    (
        64u8..=74,
        prop::option::of(any::<u64>()),
        prop::option::of(name_strategy()),
        prop::option::of(any::<u32>()),
        prop::option::of(timestamp_strategy()),
        prop::collection::vec(any::<u8>(), 0..256),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..72)),
    )
        .prop_map(|(code, rid, identity, recno, timestamp, payload, signature)| {
            let mut packet = Packet::new(Command(code)).with_payload(payload);
            packet.request_id = rid;
            packet.identity = identity;
            packet.recno = recno;
            packet.timestamp = timestamp;
            packet.signature = signature.map(Into::into);
            packet
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn timestamps_are_valid(ts in timestamp_strategy()) {
            prop_assert!(Timestamp::new(ts.seconds, ts.nanoseconds, ts.accuracy_ns).is_ok());
        }

        #[test]
        fn metadata_keeps_entry_order(entries in metadata_entries_strategy()) {
            let set = metadata_from(&entries);
            prop_assert_eq!(set.len(), entries.len());
            for (i, (id, data)) in entries.iter().enumerate() {
                let (got_id, got_data) = set.get(i).unwrap();
                prop_assert_eq!(got_id, *id);
                prop_assert_eq!(got_data, &data[..]);
            }
        }

        #[test]
        fn packets_are_requests(packet in packet_strategy()) {
            prop_assert!(!packet.command.is_response());
        }
    }
}
