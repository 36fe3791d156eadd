//! Artifact stores.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use loom_kernel::adapter::ArtifactReference;
use loom_kernel::backend::{ArtifactError, ArtifactStore};

/// Reads artifacts from the local filesystem.
///
/// `file://` prefixes are stripped. Relative paths resolve against `root`
/// when one is set.
#[derive(Debug, Clone, Default)]
pub struct FilesystemArtifactStore {
    root: Option<PathBuf>,
}

impl FilesystemArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn resolve(&self, uri: &str) -> PathBuf {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactError> {
        let path = self.resolve(&reference.uri);
        debug!(path = %path.display(), "reading artifact");
        tokio::fs::read(&path)
            .await
            .map_err(|e| classify_io_error(e.kind(), format!("{}: {e}", path.display())))
    }
}

/// Only a missing or unreadable file is permanent; other io failures
/// (resets, short reads, EIO on network mounts) are worth retrying.
fn classify_io_error(kind: ErrorKind, message: String) -> ArtifactError {
    match kind {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => ArtifactError::NotFound(message),
        _ => ArtifactError::Transient(message),
    }
}

/// Artifacts held in memory, keyed by uri.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.write().insert(uri.into(), bytes.into());
    }

    pub fn remove(&self, uri: &str) -> Option<Vec<u8>> {
        self.blobs.write().remove(uri)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactError> {
        self.blobs
            .read()
            .get(&reference.uri)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(reference.uri.clone()))
    }
}
