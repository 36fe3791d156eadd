use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use loom_kernel::adapter::ArtifactReference;
use loom_kernel::backend::{ArtifactError, ArtifactStore};
use parking_lot::RwLock;
use tokio::sync::Semaphore;

/// An in-memory artifact store with failure injection.
///
/// - transient failures: the next `n` fetches of a uri fail as retryable
/// - delay: every fetch sleeps first
/// - gate: every fetch waits for a permit, so tests can hold builds open
#[derive(Clone, Default)]
pub struct MockArtifactStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    transient: Arc<RwLock<HashMap<String, u32>>>,
    fetches: Arc<RwLock<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make fetches wait on a semaphore; returns it so the test can release
    /// permits. Each fetch consumes one permit.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn insert(&self, uri: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.write().insert(uri.into(), bytes.into());
    }

    /// Replace the stored bytes without touching the declared checksum.
    pub fn corrupt(&self, uri: &str) {
        if let Some(bytes) = self.blobs.write().get_mut(uri) {
            bytes.push(0xff);
        }
    }

    pub fn fail_transiently(&self, uri: &str, times: u32) {
        self.transient.write().insert(uri.to_string(), times);
    }

    pub fn fetch_count(&self, uri: &str) -> usize {
        self.fetches.read().get(uri).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactError> {
        let uri = reference.uri.as_str();
        *self.fetches.write().entry(uri.to_string()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| ArtifactError::Transient(e.to_string()))?
                .forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut transient = self.transient.write();
            if let Some(remaining) = transient.get_mut(uri) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ArtifactError::Transient(format!("{uri}: connection reset")));
                }
            }
        }

        self.blobs
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(uri.to_string()))
    }
}
