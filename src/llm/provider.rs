use async_trait::async_trait;
use thiserror::Error;

use super::types::ChatRequest;

/// Provider failure, split by whether trying again can help.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Rate limiting, timeouts, connection failures, 5xx.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Bad credentials, malformed requests, missing configuration.
    #[error("provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "groq", "lmstudio")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ProviderError>;
}
