//! What gets hashed and signed for a record.
//!
//! The signature primitives themselves are supplied by the caller through
//! [`RecordVerifier`]; this module only fixes the byte sequence.

use crate::name::LogIdentity;
use crate::record::LogRecord;
use sha2::{Digest, Sha256};

/// Bytes fed to the hash/sign/verify collaborator for a record:
/// the 8-byte big-endian recno followed by the payload.
#[must_use]
pub fn signing_input(recno: u64, payload: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(8 + payload.len());
    input.extend_from_slice(&recno.to_be_bytes());
    input.extend_from_slice(payload);
    input
}

/// Checks a writer's signature over [`signing_input`].
pub trait RecordVerifier: Send + Sync {
    /// Returns true if `signature` is valid for `input` on log `identity`.
    fn verify(&self, identity: &LogIdentity, input: &[u8], signature: &[u8]) -> bool;

    /// Verifies a record's attached signature. Unsigned records fail.
    fn verify_record(&self, identity: &LogIdentity, record: &LogRecord) -> bool {
        match &record.signature {
            Some(signature) => self.verify(
                identity,
                &signing_input(record.recno, &record.payload),
                signature,
            ),
            None => false,
        }
    }
}

/// How the server treats record signatures on publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    /// Accept every record.
    #[default]
    Ignore,
    /// Verify signatures that are present, accept unsigned records.
    VerifyIfPresent,
    /// Reject unsigned or badly signed records.
    Required,
}

impl SignaturePolicy {
    /// Applies the policy to `record`.
    #[must_use]
    pub fn accepts(
        &self,
        verifier: &dyn RecordVerifier,
        identity: &LogIdentity,
        record: &LogRecord,
    ) -> bool {
        match (self, &record.signature) {
            (Self::Ignore, _) => true,
            (Self::VerifyIfPresent, None) => true,
            (Self::Required, None) => false,
            (_, Some(_)) => verifier.verify_record(identity, record),
        }
    }
}

/// Incremental SHA-256 over signing input.
#[derive(Debug, Clone, Default)]
pub struct Sha256Digest {
    hasher: Sha256,
}

impl Sha256Digest {
    /// Starts a new digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finishes and returns the 32-byte digest.
    #[must_use]
    pub fn finalize(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }

    /// Digest of a record's signing input.
    #[must_use]
    pub fn of_record(recno: u64, payload: &[u8]) -> [u8; 32] {
        let mut digest = Self::new();
        digest.update(&recno.to_be_bytes());
        digest.update(payload);
        digest.finalize()
    }
}

/// Accepts a signature equal to the SHA-256 of the signing input.
///
/// Detects corruption, not forgery. Used when no key-based verifier is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestVerifier;

impl RecordVerifier for DigestVerifier {
    fn verify(&self, _identity: &LogIdentity, input: &[u8], signature: &[u8]) -> bool {
        let mut digest = Sha256Digest::new();
        digest.update(input);
        digest.finalize()[..] == *signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;
    use crate::timestamp::Timestamp;

    #[test]
    fn signing_input_layout() {
        assert_eq!(
            signing_input(2, b"ab"),
            vec![0, 0, 0, 0, 0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn digest_of_record_matches_incremental() {
        let mut digest = Sha256Digest::new();
        digest.update(&signing_input(9, b"payload"));
        assert_eq!(digest.finalize(), Sha256Digest::of_record(9, b"payload"));
    }

    #[test]
    fn policies() {
        let id = Name::parse("log");
        let unsigned = LogRecord::new(1, Timestamp::default(), b"x".to_vec());
        let good = unsigned
            .clone()
            .with_signature(Sha256Digest::of_record(1, b"x").to_vec());
        let bad = unsigned.clone().with_signature(vec![0; 32]);
        let v = DigestVerifier;

        assert!(SignaturePolicy::Ignore.accepts(&v, &id, &bad));
        assert!(SignaturePolicy::VerifyIfPresent.accepts(&v, &id, &unsigned));
        assert!(SignaturePolicy::VerifyIfPresent.accepts(&v, &id, &good));
        assert!(!SignaturePolicy::VerifyIfPresent.accepts(&v, &id, &bad));
        assert!(!SignaturePolicy::Required.accepts(&v, &id, &unsigned));
        assert!(SignaturePolicy::Required.accepts(&v, &id, &good));
    }
}
