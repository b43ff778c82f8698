use thiserror::Error;

use crate::rag::RagError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Invalid configuration: {0}")]
    Config(#[source] RagError),

    #[error("Failed to initialize embedding model: {0}")]
    Embedding(#[source] RagError),

    #[error("Failed to open index store: {0}")]
    Store(#[source] RagError),

    #[error("Failed to build index: {0}")]
    Index(#[source] RagError),

    #[error("Failed to initialize answer generator: {0}")]
    Generator(#[source] RagError),
}
