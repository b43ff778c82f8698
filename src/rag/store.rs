//! IndexStore trait and the immutable snapshot it serves queries from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use super::error::RagError;
use crate::vector_math::rank_descending_by_cosine;

/// A chunk together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// One query hit. Score is cosine similarity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub chunk: Chunk,
    pub score: f32,
}

/// Facts recorded about the entry set currently in the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub embedding_model: Option<String>,
    pub dimension: usize,
    pub updated_at: Option<String>,
}

/// An immutable, fully built entry set. Replaced wholesale, never edited.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    metadata: IndexMetadata,
}

impl IndexSnapshot {
    /// Validates that every vector is non-empty and of one shared width.
    pub fn build(entries: Vec<IndexEntry>, metadata: IndexMetadata) -> Result<Self, RagError> {
        let dimension = uniform_dimension(&entries)?;
        let mut chunks = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        for entry in entries {
            chunks.push(entry.chunk);
            vectors.push(entry.embedding);
        }
        Ok(Self {
            chunks,
            vectors,
            metadata: IndexMetadata {
                dimension,
                ..metadata
            },
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.metadata.dimension
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Top `k` entries by cosine similarity. Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntry>, RagError> {
        if query.is_empty() {
            return Err(RagError::Query("query vector is empty".to_string()));
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension() {
            return Err(RagError::Query(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension()
            )));
        }

        let mut ranked = rank_descending_by_cosine(query, &self.vectors)?;
        ranked.truncate(k);

        Ok(ranked
            .into_iter()
            .map(|(position, score)| ScoredEntry {
                chunk: self.chunks[position].clone(),
                score,
            })
            .collect())
    }
}

/// Shared vector width of `entries`, or 0 when there are none.
pub(crate) fn uniform_dimension(entries: &[IndexEntry]) -> Result<usize, RagError> {
    let dimension = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
    if let Some(bad) = entries
        .iter()
        .find(|e| e.embedding.is_empty() || e.embedding.len() != dimension)
    {
        return Err(RagError::Query(format!(
            "entry {} has dimension {}, expected {}",
            bad.chunk.id(),
            bad.embedding.len(),
            dimension
        )));
    }
    Ok(dimension)
}

/// Persisted vector index with atomic bulk replacement.
///
/// Readers must never see a mix of two entry sets: `upsert_batch` either
/// installs the whole batch or leaves the previous set untouched.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Replaces every entry with `entries`. Returns the new entry count.
    async fn upsert_batch(
        &self,
        entries: Vec<IndexEntry>,
        embedding_model: &str,
    ) -> Result<usize, RagError>;

    /// The `k` most similar entries, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, RagError>;

    async fn count(&self) -> usize;

    async fn metadata(&self) -> IndexMetadata;

    /// Vector width of the stored entries, 0 while the index is empty.
    async fn dimension(&self) -> usize {
        self.metadata().await.dimension
    }
}
