//! Adapter record types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::RegistryError;
use crate::digest::{CanonicalHasher, sha256_hex};

/// The role an adapter plays in a composition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Specializes the base model for one retailer's catalog and conventions
    Retailer,
    /// Specializes the base model for one brand's voice and assortment
    Brand,
    /// Specializes the base model for a task (bidding, copy, forecasting, ...)
    Task,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 3] = [AdapterKind::Retailer, AdapterKind::Brand, AdapterKind::Task];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retailer => "retailer",
            Self::Brand => "brand",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retailer" => Ok(Self::Retailer),
            "brand" => Ok(Self::Brand),
            "task" => Ok(Self::Task),
            other => Err(format!("unknown adapter kind '{other}'")),
        }
    }
}

/// Which version of an adapter a lookup should return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VersionSelector {
    /// Highest version that is still active
    #[default]
    LatestActive,
    /// One exact version, active or not
    Exact(u64),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatestActive => write!(f, "latest active version"),
            Self::Exact(v) => write!(f, "version {v}"),
        }
    }
}

/// `(id, version)` pair identifying one immutable adapter record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdapterRef {
    pub id: String,
    pub version: u64,
}

impl AdapterRef {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl fmt::Display for AdapterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.id, self.version)
    }
}

/// Where an adapter's weights live and how to check them once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactReference {
    /// Path or URI understood by the configured artifact store
    pub uri: String,
    /// Lowercase hex SHA-256 of the artifact bytes
    pub checksum: String,
    /// Declared artifact size, used for memory estimates before loading
    #[serde(default)]
    pub size_bytes: u64,
}

impl ArtifactReference {
    pub fn new(uri: impl Into<String>, checksum: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            uri: uri.into(),
            checksum: checksum.into(),
            size_bytes,
        }
    }

    /// Check fetched bytes against the declared checksum.
    ///
    /// On mismatch the error carries the checksum that was actually computed.
    pub fn verify(&self, payload: &[u8]) -> Result<(), String> {
        let actual = sha256_hex(payload);
        if actual.eq_ignore_ascii_case(self.checksum.trim()) {
            Ok(())
        } else {
            Err(actual)
        }
    }
}

/// Detached signature over a record's content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Identifier of the signing key, resolved by the trust policy
    pub key_id: String,
    /// Hex-encoded signature bytes
    pub value: String,
}

fn default_version() -> u64 {
    1
}
fn default_rank() -> u32 {
    8
}
fn default_scale() -> f32 {
    1.0
}

/// Immutable metadata describing one adapter version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterRecord {
    /// Unique adapter identifier, stable across versions
    pub id: String,
    pub kind: AdapterKind,
    /// Monotonic per `id`; starts at 1
    #[serde(default = "default_version")]
    pub version: u64,
    /// Retailer or brand key this adapter serves. Falls back to `id` when absent.
    #[serde(default)]
    pub target: Option<String>,
    /// Declared priority; higher wins during planning
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_rank")]
    pub rank: u32,
    /// Alpha-equivalent scaling applied to the delta
    #[serde(default = "default_scale")]
    pub scale: f32,
    pub compatible_base_models: BTreeSet<String>,
    /// Adapter ids that must be loaded alongside this one
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub artifact_reference: ArtifactReference,
    #[serde(default)]
    pub signature: Option<Signature>,
}

impl AdapterRecord {
    pub fn builder(id: impl Into<String>, kind: AdapterKind) -> AdapterRecordBuilder {
        AdapterRecordBuilder::new(id, kind)
    }

    pub fn adapter_ref(&self) -> AdapterRef {
        AdapterRef::new(self.id.clone(), self.version)
    }

    /// Whether this adapter specializes for the given retailer or brand key.
    pub fn serves(&self, key: &str) -> bool {
        self.target.as_deref().unwrap_or(&self.id) == key
    }

    pub fn is_compatible_with(&self, base_model_id: &str) -> bool {
        self.compatible_base_models.contains(base_model_id)
    }

    /// Whether any capability tag appears in `tags`.
    pub fn has_any_capability(&self, tags: &BTreeSet<String>) -> bool {
        self.capabilities.iter().any(|c| tags.contains(c))
    }

    /// Digest of everything except the signature.
    ///
    /// Two registrations of the same `(id, version)` are the same record
    /// exactly when their digests agree. Signatures are computed over this value.
    pub fn content_digest(&self) -> String {
        let mut hasher = CanonicalHasher::new();
        hasher
            .field(&self.id)
            .field(self.kind.as_str())
            .u64_field(self.version);
        match &self.target {
            Some(target) => hasher.field([1u8]).field(target),
            None => hasher.field([0u8]),
        };
        hasher
            .field(self.priority.to_le_bytes())
            .field(self.rank.to_le_bytes())
            .field(self.scale.to_bits().to_le_bytes());
        for set in [
            &self.compatible_base_models,
            &self.dependencies,
            &self.capabilities,
        ] {
            hasher.u64_field(set.len() as u64);
            for item in set {
                hasher.field(item);
            }
        }
        hasher
            .field(&self.artifact_reference.uri)
            .field(self.artifact_reference.checksum.trim().to_ascii_lowercase())
            .u64_field(self.artifact_reference.size_bytes);
        hasher.finish()
    }

    /// Structural checks applied before a record is accepted.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidRecord {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.version == 0 {
            return Err(invalid("versions start at 1"));
        }
        if self.rank == 0 {
            return Err(invalid("rank must be positive"));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(invalid("scale must be a finite positive number"));
        }
        if self.compatible_base_models.is_empty() {
            return Err(invalid("at least one compatible base model is required"));
        }
        if self.dependencies.contains(&self.id) {
            return Err(invalid("an adapter cannot depend on itself"));
        }
        if self.artifact_reference.uri.trim().is_empty() {
            return Err(invalid("artifact uri must not be empty"));
        }
        if self.artifact_reference.checksum.trim().is_empty() {
            return Err(invalid("artifact checksum must not be empty"));
        }
        Ok(())
    }
}

/// Builder for [`AdapterRecord`].
#[derive(Debug)]
pub struct AdapterRecordBuilder {
    record: AdapterRecord,
}

impl AdapterRecordBuilder {
    pub fn new(id: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            record: AdapterRecord {
                id: id.into(),
                kind,
                version: default_version(),
                target: None,
                priority: 0,
                rank: default_rank(),
                scale: default_scale(),
                compatible_base_models: BTreeSet::new(),
                dependencies: BTreeSet::new(),
                capabilities: BTreeSet::new(),
                artifact_reference: ArtifactReference::new("", "", 0),
                signature: None,
            },
        }
    }

    pub fn version(mut self, version: u64) -> Self {
        self.record.version = version;
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.record.target = Some(target.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.record.priority = priority;
        self
    }

    pub fn rank(mut self, rank: u32) -> Self {
        self.record.rank = rank;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.record.scale = scale;
        self
    }

    pub fn compatible_with(mut self, base_model_id: impl Into<String>) -> Self {
        self.record.compatible_base_models.insert(base_model_id.into());
        self
    }

    pub fn dependency(mut self, adapter_id: impl Into<String>) -> Self {
        self.record.dependencies.insert(adapter_id.into());
        self
    }

    pub fn capability(mut self, tag: impl Into<String>) -> Self {
        self.record.capabilities.insert(tag.into());
        self
    }

    pub fn capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record
            .capabilities
            .extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn artifact(
        mut self,
        uri: impl Into<String>,
        checksum: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        self.record.artifact_reference = ArtifactReference::new(uri, checksum, size_bytes);
        self
    }

    pub fn signature(mut self, key_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.record.signature = Some(Signature {
            key_id: key_id.into(),
            value: value.into(),
        });
        self
    }

    pub fn build(self) -> AdapterRecord {
        self.record
    }
}
