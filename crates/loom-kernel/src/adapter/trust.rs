//! Trust verification hook for signed adapter records.

use super::record::{AdapterRecord, Signature};

/// Verifies a record's signature before the registry accepts it.
///
/// Implementations receive the record and its detached signature; the signed
/// message is [`AdapterRecord::content_digest`]. Returning `Err` carries a
/// human-readable reason that ends up in
/// [`RegistryError::Untrusted`](super::RegistryError::Untrusted).
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, record: &AdapterRecord, signature: &Signature) -> Result<(), String>;
}
