use async_trait::async_trait;

use crate::rag::RagError;

/// Turns text into fixed-width vectors.
///
/// Implementations must be deterministic for a fixed model: the same text
/// always yields the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded alongside the persisted index.
    fn model_name(&self) -> &str;

    /// Width of every vector this embedder produces.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embeds several texts, preserving order. Backends with native batching
    /// should override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
