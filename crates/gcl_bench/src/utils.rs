//! Benchmark utilities.

use gcl_core::{LogRecord, Name, Timestamp};
use gcl_protocol::{Command, Packet};
use rand::Rng;

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a batch of records numbered from 1.
pub fn generate_records(count: usize, payload_size: usize) -> Vec<LogRecord> {
    (1..=count as u64)
        .map(|recno| LogRecord::new(recno, Timestamp::now(), random_data(payload_size)))
        .collect()
}

/// A publish request carrying every optional header field.
pub fn publish_packet(payload_size: usize) -> Packet {
    Packet::new(Command::PUBLISH)
        .with_request_id(42)
        .with_identity(Name::parse("bench-log"))
        .with_timestamp(Timestamp::now())
        .with_payload(random_data(payload_size))
}
