//! Signature checks applied at registration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

use loom_kernel::adapter::{AdapterRecord, RegistryError, Signature, SignatureVerifier};

/// Decides whether a record may enter the registry.
#[derive(Clone, Default)]
pub struct TrustPolicy {
    require_signatures: bool,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl std::fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustPolicy")
            .field("require_signatures", &self.require_signatures)
            .field("has_verifier", &self.verifier.is_some())
            .finish()
    }
}

impl TrustPolicy {
    /// Accept everything; signatures are verified only if a verifier is added.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn new(require_signatures: bool, verifier: Option<Arc<dyn SignatureVerifier>>) -> Self {
        Self {
            require_signatures,
            verifier,
        }
    }

    pub fn requires_signatures(&self) -> bool {
        self.require_signatures
    }

    /// Check `record` against the policy.
    ///
    /// A present signature is always verified when a verifier is configured,
    /// even if signatures are optional.
    pub fn check(&self, record: &AdapterRecord) -> Result<(), RegistryError> {
        let untrusted = |reason: String| RegistryError::Untrusted {
            id: record.id.clone(),
            version: record.version,
            reason,
        };

        match (&record.signature, &self.verifier) {
            (Some(signature), Some(verifier)) => {
                verifier.verify(record, signature).map_err(untrusted)
            }
            (Some(_), None) if self.require_signatures => {
                Err(untrusted("no signature verifier configured".to_string()))
            }
            (None, _) if self.require_signatures => {
                Err(untrusted("record is not signed".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Ed25519 verification over [`AdapterRecord::content_digest`].
#[derive(Debug, Clone, Default)]
pub struct Ed25519Verifier {
    keys: HashMap<String, VerifyingKey>,
}

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key_id: impl Into<String>, key: VerifyingKey) -> Self {
        self.keys.insert(key_id.into(), key);
        self
    }

    /// Build from `key_id -> hex public key` pairs, as found in configuration.
    pub fn from_hex_keys(keys: &BTreeMap<String, String>) -> Result<Self, String> {
        let mut verifier = Self::new();
        for (key_id, hex_key) in keys {
            let bytes: [u8; 32] = hex::decode(hex_key.trim())
                .map_err(|e| format!("signer '{key_id}': {e}"))?
                .try_into()
                .map_err(|_| format!("signer '{key_id}': public key must be 32 bytes"))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| format!("signer '{key_id}': {e}"))?;
            verifier.keys.insert(key_id.clone(), key);
        }
        Ok(verifier)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, record: &AdapterRecord, signature: &Signature) -> Result<(), String> {
        let key = self
            .keys
            .get(&signature.key_id)
            .ok_or_else(|| format!("unknown signing key '{}'", signature.key_id))?;
        let bytes: [u8; 64] = hex::decode(signature.value.trim())
            .map_err(|e| format!("malformed signature: {e}"))?
            .try_into()
            .map_err(|_| "signature must be 64 bytes".to_string())?;
        let signature = ed25519_dalek::Signature::from_bytes(&bytes);
        key.verify(record.content_digest().as_bytes(), &signature)
            .map_err(|_| "signature does not match record content".to_string())
    }
}

/// Sign `record` in place with `key`, replacing any previous signature.
pub fn sign_record(record: &mut AdapterRecord, key_id: impl Into<String>, key: &SigningKey) {
    let signature = key.sign(record.content_digest().as_bytes());
    record.signature = Some(Signature {
        key_id: key_id.into(),
        value: hex::encode(signature.to_bytes()),
    });
}
