use std::sync::Arc;

use serde::Serialize;

use super::error::RagError;
use super::store::{IndexStore, ScoredEntry};
use crate::core::config::RetrievalSettings;
use crate::embedding::Embedder;

/// Ranked hits for one on-topic query, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<ScoredEntry>,
    pub best_score: f32,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Outcome of the relevance gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    OnTopic(RetrievalResult),
    /// The best hit scored below the threshold (or there were no hits).
    OffTopic { best_score: f32 },
}

impl Retrieval {
    pub fn best_score(&self) -> f32 {
        match self {
            Self::OnTopic(result) => result.best_score,
            Self::OffTopic { best_score } => *best_score,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    top_k: usize,
    threshold: f32,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        top_k: usize,
        threshold: f32,
    ) -> Self {
        Self {
            embedder,
            store,
            top_k,
            threshold,
        }
    }

    pub fn from_settings(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        settings: &RetrievalSettings,
    ) -> Self {
        Self::new(embedder, store, settings.top_k, settings.similarity_threshold)
    }

    /// Embeds `query`, fetches the top-k hits, and applies the off-topic gate
    /// on the single best score.
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, RagError> {
        let vector = self.embed_query(query).await?;
        self.search(query, &vector).await
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        self.embedder.embed(query).await
    }

    /// Top-k lookup for an already embedded query, followed by the gate.
    pub async fn search(&self, query: &str, vector: &[f32]) -> Result<Retrieval, RagError> {
        let hits = self.store.query(vector, self.top_k).await?;
        Ok(self.gate(query, hits))
    }

    fn gate(&self, query: &str, hits: Vec<ScoredEntry>) -> Retrieval {
        let best_score = hits.first().map(|hit| hit.score).unwrap_or(0.0);
        if hits.is_empty() || best_score < self.threshold {
            tracing::debug!(
                "Off-topic query (best score {:.3} < {:.3})",
                best_score,
                self.threshold
            );
            return Retrieval::OffTopic { best_score };
        }

        Retrieval::OnTopic(RetrievalResult {
            query: query.to_string(),
            hits,
            best_score,
        })
    }
}
