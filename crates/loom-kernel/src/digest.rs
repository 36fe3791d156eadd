//! Canonical hashing shared by record digests and plan fingerprints.

use sha2::{Digest, Sha256};

/// Length-prefixed SHA-256 accumulator.
///
/// Every field is prefixed with its byte length, so `("ab", "c")` and
/// `("a", "bc")` never hash to the same value.
#[derive(Clone, Default)]
pub struct CanonicalHasher {
    inner: Sha256,
}

impl CanonicalHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one length-prefixed field.
    pub fn field(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        let bytes = bytes.as_ref();
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn u64_field(&mut self, value: u64) -> &mut Self {
        self.field(value.to_le_bytes())
    }

    /// Consume the hasher and return the lowercase hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Lowercase hex SHA-256 of a byte slice, the checksum format used by
/// artifact references.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
