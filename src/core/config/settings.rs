//! Typed runtime settings.
//!
//! Built once at startup from the merged YAML/env document and passed by
//! reference to every component. Every field has a default, so an empty
//! `config.yml` yields a working local setup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::RetryPolicy;
use crate::rag::RagError;

const MAX_GENERATOR_RETRIES: u32 = 10;

pub const DEFAULT_REFUSAL_MESSAGE: &str = "I can only answer questions about Acme Corporation's company policies \
(such as PTO, benefits, remote work, security, expenses, etc.). \
For other questions, please contact HR at hr@acmecorp.com.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub context: ContextSettings,
    pub embedding: EmbeddingSettings,
    pub generator: GeneratorSettings,
    pub index: IndexSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Vec<String>,
    pub max_message_chars: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            request_timeout_secs: 60,
            cors_allowed_origins: Vec::new(),
            max_message_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Best-hit cosine score below which a question is treated as off-topic.
    pub similarity_threshold: f32,
    pub refusal_message: String,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.3,
            refusal_message: DEFAULT_REFUSAL_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Per-chunk character budget inside the prompt.
    pub max_chunk_chars: usize,
    /// Length of the snippet returned with each source.
    pub snippet_chars: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
            snippet_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Sentence-transformer model run in-process with ONNX Runtime.
    Local,
    /// Token hashing, no model files. Offline runs and tests.
    Hashing,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    /// Model repository name (`local`) or model sent to the endpoint (`open_ai`).
    pub model: String,
    /// Vector width for the `hashing` backend.
    pub dimension: usize,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    /// Defaults to `<data_dir>/models/<model>`.
    pub model_dir: Option<PathBuf>,
    /// Organization URL that missing model files are fetched from; empty
    /// disables downloads.
    pub model_repo_url: String,
    /// Token limit per text for the `local` backend.
    pub max_length: usize,
    pub download_timeout_secs: u64,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Concurrent embedding requests during ingestion.
    pub concurrency: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            model_dir: None,
            model_repo_url: "https://huggingface.co/sentence-transformers".to_string(),
            max_length: 256,
            download_timeout_secs: 600,
            base_url: "http://127.0.0.1:1234/v1".to_string(),
            api_key: None,
            timeout_secs: 10,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_answer_words: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            model: "llama-3.1-8b-instant".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_answer_words: 250,
            timeout_secs: 15,
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Rebuild from the corpus at startup even if a persisted index exists.
    pub rebuild_on_start: bool,
}

impl Settings {
    /// Cross-field checks that the raw document validation cannot express.
    pub fn validate(&self) -> Result<(), RagError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunking.chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }

        let retrieval = &self.retrieval;
        if retrieval.top_k == 0 {
            return Err(RagError::Configuration(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&retrieval.similarity_threshold) {
            return Err(RagError::Configuration(format!(
                "retrieval.similarity_threshold must be within [0, 1], got {}",
                retrieval.similarity_threshold
            )));
        }
        if retrieval.refusal_message.trim().is_empty() {
            return Err(RagError::Configuration(
                "retrieval.refusal_message cannot be empty".to_string(),
            ));
        }

        if self.context.max_chunk_chars == 0 {
            return Err(RagError::Configuration(
                "context.max_chunk_chars must be greater than zero".to_string(),
            ));
        }

        let embedding = &self.embedding;
        match embedding.backend {
            EmbeddingBackend::Hashing if embedding.dimension == 0 => {
                return Err(RagError::Configuration(
                    "embedding.dimension must be greater than zero".to_string(),
                ));
            }
            EmbeddingBackend::Local | EmbeddingBackend::OpenAi
                if embedding.model.trim().is_empty() =>
            {
                return Err(RagError::Configuration(
                    "embedding.model cannot be empty".to_string(),
                ));
            }
            EmbeddingBackend::Local if embedding.max_length == 0 => {
                return Err(RagError::Configuration(
                    "embedding.max_length must be greater than zero".to_string(),
                ));
            }
            _ => {}
        }
        if self.embedding.concurrency == 0 {
            return Err(RagError::Configuration(
                "embedding.concurrency must be at least 1".to_string(),
            ));
        }

        let generator = &self.generator;
        if generator.model.trim().is_empty() {
            return Err(RagError::Configuration(
                "generator.model cannot be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&generator.temperature) {
            return Err(RagError::Configuration(format!(
                "generator.temperature must be within [0, 2], got {}",
                generator.temperature
            )));
        }
        if generator.max_tokens == 0 {
            return Err(RagError::Configuration(
                "generator.max_tokens must be greater than zero".to_string(),
            ));
        }
        if generator.initial_backoff_ms > generator.max_backoff_ms {
            return Err(RagError::Configuration(
                "generator.initial_backoff_ms cannot exceed generator.max_backoff_ms".to_string(),
            ));
        }
        if generator.max_retries > MAX_GENERATOR_RETRIES {
            return Err(RagError::Configuration(format!(
                "generator.max_retries cannot exceed {}",
                MAX_GENERATOR_RETRIES
            )));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(RagError::Configuration(
                "server.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        let budget = self.chat_call_budget();
        if budget > self.request_timeout() {
            return Err(RagError::Configuration(format!(
                "external calls for one chat request can take up to {:?}, longer than \
server.request_timeout_secs ({}s); lower generator.timeout_secs or generator.max_retries",
                budget, self.server.request_timeout_secs
            )));
        }

        Ok(())
    }

    /// Worst-case time one chat request spends waiting on external services:
    /// the query embedding call plus every generation attempt and backoff.
    pub fn chat_call_budget(&self) -> Duration {
        let generator = &self.generator;
        let retry = RetryPolicy::from_settings(generator);
        let attempts =
            Duration::from_secs(generator.timeout_secs).saturating_mul(generator.max_retries + 1);
        let backoff = (0..generator.max_retries)
            .map(|attempt| retry.backoff_ceiling(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);

        let embedding = match self.embedding.backend {
            EmbeddingBackend::OpenAi => Duration::from_secs(self.embedding.timeout_secs),
            _ => Duration::ZERO,
        };

        attempts.saturating_add(backoff).saturating_add(embedding)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().expect("defaults should validate");
        assert_eq!(settings.retrieval.top_k, 5);
        assert!((settings.retrieval.similarity_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut settings = Settings::default();
        settings.chunking.chunk_size = 200;
        settings.chunking.chunk_overlap = 200;

        let err = settings.validate().unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let mut settings = Settings::default();
        settings.retrieval.similarity_threshold = 1.5;
        assert!(matches!(
            settings.validate(),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn default_chat_budget_fits_the_request_timeout() {
        let mut settings = Settings::default();
        settings.embedding.backend = EmbeddingBackend::OpenAi;

        // 10s embedding + 3 x 15s attempts + 0.5s + 1s backoff
        assert_eq!(settings.chat_call_budget(), Duration::from_millis(56_500));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn retry_budget_longer_than_request_timeout_is_rejected() {
        let mut settings = Settings::default();
        settings.generator.timeout_secs = 30;
        settings.generator.max_retries = 3;

        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            RagError::Configuration(ref msg) if msg.contains("request_timeout_secs")
        ));

        settings.server.request_timeout_secs = 180;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn local_backend_needs_a_model_name() {
        let mut settings = Settings::default();
        assert_eq!(settings.embedding.backend, EmbeddingBackend::Local);

        settings.embedding.model = "  ".to_string();
        assert!(matches!(
            settings.validate(),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let value = serde_json::json!({
            "chunking": { "chunk_size": 500 },
            "embedding": { "backend": "open_ai" }
        });
        let settings: Settings = serde_json::from_value(value).unwrap();

        assert_eq!(settings.chunking.chunk_size, 500);
        assert_eq!(settings.chunking.chunk_overlap, 200);
        assert_eq!(settings.embedding.backend, EmbeddingBackend::OpenAi);
        assert_eq!(settings.generator.model, "llama-3.1-8b-instant");
    }
}
