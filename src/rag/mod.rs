//! Retrieval-augmented answering over the policy corpus.
//!
//! - `document` / `chunker`: corpus loading and overlapping chunks
//! - `store` / `sqlite`: the persisted vector index
//! - `indexer`: rebuilds the index from the corpus
//! - `retriever`, `context_builder`, `pipeline`: per-question flow

pub mod chunker;
pub mod context_builder;
pub mod document;
mod error;
pub mod indexer;
pub mod pipeline;
pub mod retriever;
pub mod sqlite;
pub mod store;

pub use chunker::{Chunk, Chunker};
pub use context_builder::{ContextBuilder, ContextBuilderConfig, SourceRef};
pub use document::{load_corpus, Document};
pub use error::RagError;
pub use indexer::{IndexReport, Indexer};
pub use pipeline::{ChatPipeline, ChatResponse, Stage};
pub use retriever::{Retrieval, RetrievalResult, Retriever};
pub use sqlite::SqliteIndexStore;
pub use store::{IndexEntry, IndexMetadata, IndexSnapshot, IndexStore, ScoredEntry};
