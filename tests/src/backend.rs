use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_kernel::adapter::AdapterRef;
use loom_kernel::backend::{ForwardError, ForwardOutput, ForwardPass, ToolCall, ToolSpec};
use loom_kernel::composition::{ComposedWeights, Fingerprint};
use parking_lot::RwLock;

/// One recorded forward call.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardCall {
    pub base_model_id: String,
    pub fingerprint: Fingerprint,
    pub adapters: Vec<AdapterRef>,
    pub prompt: String,
    pub tools: Vec<String>,
}

/// A scripted forward pass.
///
/// Responses are matched by prompt substring, falling back to a fixed
/// response. Every call is recorded with the composition it ran against.
#[derive(Clone)]
pub struct MockForwardPass {
    responses: Arc<RwLock<HashMap<String, String>>>,
    fallback_response: String,
    failure: Arc<RwLock<Option<ForwardError>>>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<ForwardCall>>>,
}

impl Default for MockForwardPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MockForwardPass {
    pub fn new() -> Self {
        Self {
            responses: Arc::default(),
            fallback_response: "This is a fallback mock response.".to_string(),
            failure: Arc::default(),
            delay: None,
            calls: Arc::default(),
        }
    }

    /// If the prompt contains `prompt_key`, respond with `response`.
    pub fn add_mock_response(&self, prompt_key: &str, response: &str) {
        self.responses
            .write()
            .insert(prompt_key.to_string(), response.to_string());
    }

    pub fn set_fallback_response(&mut self, response: &str) {
        self.fallback_response = response.to_string();
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every subsequent call with `error`, or succeed again with `None`.
    pub fn fail_with(&self, error: Option<ForwardError>) {
        *self.failure.write() = error;
    }

    pub fn calls(&self) -> Vec<ForwardCall> {
        self.calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }
}

#[async_trait]
impl ForwardPass for MockForwardPass {
    fn name(&self) -> &str {
        "mock"
    }

    async fn forward(
        &self,
        base_model_id: &str,
        weights: &ComposedWeights,
        prompt: &str,
        tools: &[ToolSpec],
    ) -> Result<ForwardOutput, ForwardError> {
        self.calls.write().push(ForwardCall {
            base_model_id: base_model_id.to_string(),
            fingerprint: weights.fingerprint.clone(),
            adapters: weights.adapter_refs(),
            prompt: prompt.to_string(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.read().clone() {
            return Err(error);
        }

        let text = self
            .responses
            .read()
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.fallback_response.clone());
        Ok(ForwardOutput {
            token_count: text.split_whitespace().count() as u32,
            text,
            tool_calls: tools
                .iter()
                .map(|t| ToolCall {
                    name: t.name.clone(),
                    arguments: serde_json::Value::Object(Default::default()),
                })
                .collect(),
        })
    }
}

#[macro_export]
macro_rules! assert_forward_called {
    ($backend:expr, $expected_count:expr) => {
        let count = $backend.call_count();
        assert_eq!(
            count, $expected_count,
            "expected {} forward calls, got {}",
            $expected_count, count
        );
    };
}
