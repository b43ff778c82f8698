//! Embedding models behind the [`Embedder`] interface.

mod hashing;
#[cfg(feature = "local-model")]
mod onnx;
mod openai;
mod provider;

use std::path::Path;
use std::sync::Arc;

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-model")]
pub use onnx::OnnxEmbedder;
pub use openai::OpenAiEmbedder;
pub use provider::Embedder;

use crate::core::config::{EmbeddingBackend, EmbeddingSettings};
use crate::rag::RagError;

/// Builds the configured embedder. Failure means the model is unavailable.
///
/// `models_dir` is where the `local` backend keeps downloaded model files.
pub async fn from_settings(
    settings: &EmbeddingSettings,
    models_dir: &Path,
) -> Result<Arc<dyn Embedder>, RagError> {
    match settings.backend {
        EmbeddingBackend::Local => local_model(settings, models_dir).await,
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(settings.dimension)?)),
        EmbeddingBackend::OpenAi => Ok(Arc::new(OpenAiEmbedder::connect(settings).await?)),
    }
}

#[cfg(feature = "local-model")]
async fn local_model(
    settings: &EmbeddingSettings,
    models_dir: &Path,
) -> Result<Arc<dyn Embedder>, RagError> {
    Ok(Arc::new(OnnxEmbedder::load(settings, models_dir).await?))
}

#[cfg(not(feature = "local-model"))]
async fn local_model(
    _settings: &EmbeddingSettings,
    _models_dir: &Path,
) -> Result<Arc<dyn Embedder>, RagError> {
    Err(RagError::Configuration(
        "embedding.backend 'local' requires the `local-model` feature".to_string(),
    ))
}
