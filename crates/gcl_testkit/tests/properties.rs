//! Cross-crate property tests.

use gcl_core::{
    GclError, IndexCache, LogHeader, LogStore, MetadataSet, Name, RecordCodec, StoreConfig,
    Timestamp, LOG_HEADER_SIZE, RECORD_HEADER_SIZE,
};
use gcl_protocol::{Decoded, FrameBuffer, Packet};
use gcl_server::ReplicationState;
use gcl_storage::InMemoryBackend;
use gcl_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn record_round_trip(record in record_strategy()) {
        let codec = RecordCodec::default();
        let bytes = codec.encode(&record).unwrap();
        prop_assert_eq!(bytes.len(), RECORD_HEADER_SIZE + record.payload.len());
        prop_assert_eq!(codec.decode(&bytes).unwrap(), record);
    }

    #[test]
    fn metadata_round_trip(metadata in metadata_strategy()) {
        let bytes = metadata.serialize().unwrap();
        prop_assert_eq!(bytes.len(), metadata.serialized_len());
        let decoded = MetadataSet::deserialize(&bytes).unwrap();
        prop_assert!(decoded.is_read_only());
        prop_assert_eq!(decoded, metadata);
    }

    #[test]
    fn packet_decodes_byte_by_byte(packet in packet_strategy()) {
        let bytes = packet.encode().unwrap();
        for end in 0..bytes.len() {
            match Packet::decode(&bytes[..end]).unwrap() {
                Decoded::NeedMoreData { have, need } => {
                    prop_assert_eq!(have, end);
                    prop_assert!(need > end && need <= bytes.len());
                }
                Decoded::Packet { .. } => prop_assert!(false, "decoded from {end} of {} bytes", bytes.len()),
            }
        }
        match Packet::decode(&bytes).unwrap() {
            Decoded::Packet { packet: decoded, consumed } => {
                prop_assert_eq!(consumed, bytes.len());
                prop_assert_eq!(&decoded, &packet);
            }
            Decoded::NeedMoreData { .. } => prop_assert!(false, "complete packet not decoded"),
        }

        let mut frames = FrameBuffer::new();
        let mut decoded = Vec::new();
        for byte in bytes.iter().chain(bytes.iter()) {
            frames.extend(std::slice::from_ref(byte));
            if let Some(p) = frames.next_packet().unwrap() {
                decoded.push(p);
            }
        }
        prop_assert_eq!(decoded, vec![packet.clone(), packet]);
    }

    #[test]
    fn index_cache_keeps_latest_window(capacity in 1usize..32, count in 0u64..200) {
        let mut cache = IndexCache::new(capacity).unwrap();
        for key in 1..=count {
            cache.append(key, key * 100).unwrap();
        }
        let oldest_kept = count.saturating_sub(capacity as u64) + 1;
        for key in 1..=count {
            if key >= oldest_kept {
                prop_assert_eq!(cache.search(key), Some(key * 100));
            } else {
                prop_assert_eq!(cache.search(key), None);
            }
        }
        prop_assert_eq!(cache.len() as u64, count.min(capacity as u64));
    }

    #[test]
    fn torn_tail_recovers_complete_records(
        payloads in prop::collection::vec(payload_strategy(), 1..8),
        cut_seed in any::<u64>(),
    ) {
        let log = TestLog::file();
        for payload in &payloads {
            log.append(payload, Timestamp::now()).unwrap();
        }
        let path = log.config.log_path(log.identity());
        let bytes = std::fs::read(&path).unwrap();

        let data_start = LOG_HEADER_SIZE;
        let cut = data_start + (cut_seed as usize) % (bytes.len() - data_start + 1);
        let mut complete = 0u64;
        let mut end = data_start;
        for payload in &payloads {
            end += RECORD_HEADER_SIZE + payload.len();
            if end <= cut {
                complete += 1;
            }
        }

        let backend = InMemoryBackend::with_data(bytes[..cut].to_vec());
        let reopened =
            LogStore::open_with_backend(*log.identity(), Box::new(backend), &StoreConfig::default())
                .unwrap();
        prop_assert_eq!(reopened.last_recno(), complete);
        if complete > 0 {
            prop_assert_eq!(&reopened.read(complete).unwrap().payload, &payloads[complete as usize - 1]);
        }
    }

    #[test]
    fn oversized_declared_length_is_corrupt(
        declared in (1u64 << 20)..=u64::MAX,
        stray in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let codec = RecordCodec::default();
        let mut image = LogHeader::new(0).unwrap().encode().to_vec();
        codec.encode_parts(1, &Timestamp::new(1, 0, 0).unwrap(), b"first", &mut image).unwrap();
        let mut bad = Vec::new();
        codec.encode_parts(2, &Timestamp::new(2, 0, 0).unwrap(), b"", &mut bad).unwrap();
        bad[24..32].copy_from_slice(&declared.to_be_bytes());
        image.extend_from_slice(&bad);
        image.extend_from_slice(&stray);

        let config = StoreConfig::default().max_record_size(1 << 16);
        let result = LogStore::open_with_backend(
            Name::parse("corrupt"),
            Box::new(InMemoryBackend::with_data(image)),
            &config,
        );
        prop_assert!(matches!(result, Err(GclError::Corrupt { .. })), "expected GclError::Corrupt");
    }
}

#[test]
fn concurrent_appends_have_no_gaps() {
    let log = Arc::new(TestLog::memory());
    let writers: Vec<_> = (0..4)
        .map(|w| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        log.append(format!("w{w}-{i}").as_bytes(), Timestamp::now())
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut recnos: Vec<u64> = writers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    recnos.sort_unstable();
    assert_eq!(recnos, (1..=200).collect::<Vec<_>>());
    assert_eq!(log.last_recno(), 200);
}

#[test]
fn hello_world() {
    with_temp_log(|log| {
        assert_eq!(log.append(b"hello", Timestamp::now()).unwrap(), 1);
        assert_eq!(log.append(b"world", Timestamp::now()).unwrap(), 2);
        assert_eq!(log.read(1).unwrap().payload, b"hello");
        let err = log.read(3).unwrap_err();
        assert!(matches!(err, GclError::RecordNotFound { recno: 3, .. }));
        assert!(err.is_not_found());
    });
}

#[test]
fn quorum_one_with_three_replicas_out_of_order() {
    let harness = ReplicationHarness::new("local", &["local", "r1", "r2", "r3"], 1);
    let (key, mut reply) = harness.publish(b"payload");
    assert_eq!(harness.transport.sent().len(), 3);

    harness.ack(key, "r3");
    assert!(reply.try_recv().is_ok());
    assert_eq!(harness.coordinator.state(key), Some(ReplicationState::QuorumReached));

    harness.ack(key, "r1");
    harness.ack(key, "r1");
    assert_eq!(harness.coordinator.state(key), Some(ReplicationState::QuorumReached));
    harness.ack(key, "r2");
    assert_eq!(harness.coordinator.state(key), None);
    assert_eq!(harness.coordinator.stats().quorum_replies, 1);
}

#[test]
fn quorum_two_waits_for_second_distinct_ack() {
    let harness = ReplicationHarness::new("local", &["r1", "r2", "r3"], 2);
    let (key, mut reply) = harness.publish(b"payload");

    harness.ack(key, "r2");
    harness.ack(key, "r2");
    assert!(reply.try_recv().is_err());
    harness.ack(key, "r1");
    assert!(reply.try_recv().is_ok());
    assert_eq!(harness.coordinator.pending_count(), 1);
    assert_eq!(server("r1"), Name::parse("r1"));
}
