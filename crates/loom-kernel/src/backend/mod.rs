//! External collaborators: the forward pass and the artifact store.
//!
//! Both are async traits so the federation core can run against a real
//! serving backend, a blob store, or the in-memory doubles used in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::ArtifactReference;
use crate::composition::ComposedWeights;

/// A tool made available to the model for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::Value::Null,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What the forward pass produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardOutput {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub token_count: u32,
}

/// Forward pass failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Forward pass timed out after {0} ms")]
    Timeout(u64),
}

/// Runs the base model with a composed adapter stack applied.
#[async_trait]
pub trait ForwardPass: Send + Sync {
    fn name(&self) -> &str;

    async fn forward(
        &self,
        base_model_id: &str,
        weights: &ComposedWeights,
        prompt: &str,
        tools: &[ToolSpec],
    ) -> Result<ForwardOutput, ForwardError>;
}

/// Artifact fetch failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    /// Worth retrying: timeouts, interrupted reads, throttling
    #[error("Transient artifact error: {0}")]
    Transient(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),
}

impl ArtifactError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Fetches raw adapter weights by reference.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactError>;
}
