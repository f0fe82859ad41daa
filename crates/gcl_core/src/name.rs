//! 256-bit names for logs and servers.
//!
//! A name is derived from human-readable text. Text that already is a
//! 43-character printable name decodes to exactly that name, anything else
//! is hashed with SHA-256, so the same text always maps to the same log.

use crate::error::{GclError, GclResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Length of a binary name in bytes.
pub const NAME_LEN: usize = 32;

/// Length of the printable (unpadded URL-safe base64) form.
pub const PRINTABLE_LEN: usize = 43;

/// A fixed-width 256-bit identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name([u8; NAME_LEN]);

/// The identity of a log.
pub type LogIdentity = Name;

/// The identity of a log server.
pub type ServerId = Name;

impl Name {
    /// The all-zero name. Never a valid identity.
    pub const ZERO: Self = Self([0; NAME_LEN]);

    /// Creates a name from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a name from a byte slice of exactly [`NAME_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice has the wrong length.
    pub fn from_slice(bytes: &[u8]) -> GclResult<Self> {
        let array: [u8; NAME_LEN] = bytes.try_into().map_err(|_| {
            GclError::invalid_argument(format!(
                "name must be {NAME_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Derives a name from external text.
    ///
    /// A printable name is decoded as-is; other text is hashed.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::from_printable(text).unwrap_or_else(|_| Self::hash_of(text.as_bytes()))
    }

    /// Hashes arbitrary bytes into a name.
    #[must_use]
    pub fn hash_of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Decodes a printable name.
    ///
    /// # Errors
    ///
    /// Returns an error unless `text` is exactly a 43-character printable name.
    pub fn from_printable(text: &str) -> GclResult<Self> {
        if text.len() != PRINTABLE_LEN {
            return Err(GclError::invalid_argument(format!(
                "printable name must be {PRINTABLE_LEN} characters, got {}",
                text.len()
            )));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|e| GclError::invalid_argument(format!("bad printable name: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Returns the 43-character printable form.
    #[must_use]
    pub fn printable(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Generates a random name.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; NAME_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns false for the all-zero name.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        *self != Self::ZERO
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }
}

impl FromStr for Name {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.printable())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = self.printable();
        write!(f, "Name({}..)", &printable[..8])
    }
}

impl From<[u8; NAME_LEN]> for Name {
    fn from(bytes: [u8; NAME_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_hashed() {
        let name = Name::parse("edu.berkeley.eecs.swarmlab.device.01");
        assert_eq!(
            name,
            Name::hash_of(b"edu.berkeley.eecs.swarmlab.device.01")
        );
        assert!(name.is_valid());
    }

    #[test]
    fn printable_round_trips() {
        let name = Name::parse("hello");
        let printable = name.printable();
        assert_eq!(printable.len(), PRINTABLE_LEN);
        assert_eq!(Name::parse(&printable), name);
        assert_eq!(printable.parse::<Name>().unwrap(), name);
    }

    #[test]
    fn printable_is_url_safe() {
        let name = Name::from_bytes([0xFB; NAME_LEN]);
        let printable = name.printable();
        assert!(!printable.contains('+'));
        assert!(!printable.contains('/'));
        assert!(!printable.contains('='));
    }

    #[test]
    fn zero_name_is_invalid() {
        assert!(!Name::ZERO.is_valid());
        assert!(!Name::default().is_valid());
    }

    #[test]
    fn random_names_differ() {
        assert_ne!(Name::random(), Name::random());
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(Name::from_slice(&[1; 31]).is_err());
        assert!(Name::from_slice(&[1; 32]).is_ok());
    }

    #[test]
    fn forty_three_chars_of_garbage_is_hashed() {
        let text = "!".repeat(PRINTABLE_LEN);
        assert_eq!(Name::parse(&text), Name::hash_of(text.as_bytes()));
    }
}
