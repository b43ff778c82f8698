use thiserror::Error;

/// Failures of the retrieval pipeline, from configuration through generation.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking, retrieval or generator parameters. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single source document could not be used. The document is skipped.
    #[error("Ingestion error ({source_name}): {message}")]
    Ingestion {
        source_name: String,
        message: String,
    },

    /// The embedding model is unavailable or returned an unusable vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The persisted index could not be opened, read or written.
    #[error("Index store unavailable: {0}")]
    StoreUnavailable(String),

    /// A query vector does not fit the index (empty or wrong dimension).
    #[error("Query error: {0}")]
    Query(String),

    /// Caller supplied input a component cannot work with.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The text-generation provider failed after bounded retries.
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("A reindex is already running")]
    ReindexInProgress,
}

impl RagError {
    pub fn ingestion(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ingestion {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
