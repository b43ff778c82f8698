//! Ingestion: corpus → chunks → embeddings → atomic index replacement.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::sync::Mutex;

use super::chunker::{Chunk, Chunker};
use super::document::load_corpus;
use super::error::RagError;
use super::store::{IndexEntry, IndexStore};
use crate::embedding::Embedder;

const EMBED_BATCH_SIZE: usize = 16;

/// Outcome of a successful reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub documents_loaded: usize,
    pub documents_skipped: usize,
    pub chunks_indexed: usize,
}

pub struct Indexer {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    corpus_dir: PathBuf,
    concurrency: usize,
    guard: Mutex<()>,
}

impl Indexer {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        corpus_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            corpus_dir: corpus_dir.into(),
            concurrency: concurrency.max(1),
            guard: Mutex::new(()),
        }
    }

    /// Rebuilds the index from the corpus directory.
    ///
    /// Only one reindex runs at a time; a concurrent call fails with
    /// [`RagError::ReindexInProgress`]. Any failure leaves the previous index
    /// serving queries.
    pub async fn reindex(&self) -> Result<IndexReport, RagError> {
        let _guard = self
            .guard
            .try_lock()
            .map_err(|_| RagError::ReindexInProgress)?;

        tracing::info!("Reindexing corpus at {}", self.corpus_dir.display());
        let corpus = load_corpus(&self.corpus_dir)?;
        let mut documents_skipped = corpus.skipped.len();
        let mut documents_loaded = 0;

        let mut chunks: Vec<Chunk> = Vec::new();
        for document in &corpus.documents {
            match self.chunker.chunks(document) {
                Ok(iter) => {
                    let before = chunks.len();
                    chunks.extend(iter);
                    documents_loaded += 1;
                    tracing::debug!(
                        "Chunked {} into {} chunks",
                        document.source,
                        chunks.len() - before
                    );
                }
                Err(err) => {
                    tracing::warn!("Skipping document: {}", err);
                    documents_skipped += 1;
                }
            }
        }

        if chunks.is_empty() {
            return Err(RagError::ingestion(
                self.corpus_dir.display().to_string(),
                "corpus produced no chunks; keeping the current index",
            ));
        }

        let embeddings = self.embed_chunks(&chunks).await?;
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        let chunks_indexed = self
            .store
            .upsert_batch(entries, self.embedder.model_name())
            .await?;

        let report = IndexReport {
            documents_loaded,
            documents_skipped,
            chunks_indexed,
        };
        tracing::info!(
            "Indexed {} chunks from {} documents ({} skipped)",
            report.chunks_indexed,
            report.documents_loaded,
            report.documents_skipped
        );
        Ok(report)
    }

    /// Loads the persisted index, rebuilding it when it is empty, was built
    /// with a different embedding model, or `force` is set.
    ///
    /// Returns `None` when the persisted index was reused as is.
    pub async fn ensure_index(&self, force: bool) -> Result<Option<IndexReport>, RagError> {
        let count = self.store.count().await;
        let metadata = self.store.metadata().await;
        let model = self.embedder.model_name();

        let reason = if force {
            Some("rebuild requested by configuration".to_string())
        } else if count == 0 {
            Some("index is empty".to_string())
        } else if metadata.embedding_model.as_deref() != Some(model) {
            Some(format!(
                "embedding model changed ({} -> {})",
                metadata.embedding_model.as_deref().unwrap_or("unknown"),
                model
            ))
        } else if metadata.dimension != self.embedder.dimension() {
            Some(format!(
                "dimension changed ({} -> {})",
                metadata.dimension,
                self.embedder.dimension()
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => {
                tracing::info!("Building index: {}", reason);
                self.reindex().await.map(Some)
            }
            None => {
                tracing::info!("Using persisted index with {} entries", count);
                Ok(None)
            }
        }
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, RagError> {
        let texts: Vec<Vec<String>> = chunks
            .chunks(EMBED_BATCH_SIZE)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts)
            .map(|texts| {
                let embedder = self.embedder.clone();
                async move { embedder.embed_batch(&texts).await }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let embeddings: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::rag::sqlite::SqliteIndexStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        corpus: PathBuf,
        store: Arc<SqliteIndexStore>,
        indexer: Indexer,
    }

    async fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("policies");
        fs::create_dir_all(&corpus).unwrap();
        for (name, body) in files {
            fs::write(corpus.join(name), body).unwrap();
        }
        let store = Arc::new(
            SqliteIndexStore::open(dir.path().join("index.db"))
                .await
                .unwrap(),
        );
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64).unwrap());
        let indexer = Indexer::new(
            Chunker::new(120, 20).unwrap(),
            embedder,
            store.clone(),
            &corpus,
            2,
        );
        Fixture {
            _dir: dir,
            corpus,
            store,
            indexer,
        }
    }

    const PTO: &str = "# Paid Time Off\n\nEmployees accrue vacation days every month. \
New employees receive fifteen days per year.\n\nUnused days roll over up to five days.";
    const REMOTE: &str = "# Remote Work\n\nStaff may work remotely two days per week with manager approval.";

    #[tokio::test]
    async fn reindex_indexes_every_document_and_skips_blank_ones() {
        let fx = fixture(&[("pto.md", PTO), ("remote.md", REMOTE), ("blank.md", "  \n")]).await;

        let report = fx.indexer.reindex().await.unwrap();

        assert_eq!(report.documents_loaded, 2);
        assert_eq!(report.documents_skipped, 1);
        assert!(report.chunks_indexed >= 2);
        assert_eq!(fx.store.count().await, report.chunks_indexed);
        assert_eq!(
            fx.store.metadata().await.embedding_model.as_deref(),
            Some("hashing-v1-64")
        );
    }

    #[tokio::test]
    async fn reindex_is_idempotent() {
        let fx = fixture(&[("pto.md", PTO), ("remote.md", REMOTE)]).await;

        fx.indexer.reindex().await.unwrap();
        let first = fx.store.snapshot().await;
        fx.indexer.reindex().await.unwrap();
        let second = fx.store.snapshot().await;

        assert_eq!(first.chunks(), second.chunks());

        let query = HashingEmbedder::new(64)
            .unwrap()
            .embed("vacation days")
            .await
            .unwrap();
        assert_eq!(
            first.search(&query, 5).unwrap(),
            second.search(&query, 5).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_corpus_fails_and_keeps_previous_index() {
        let fx = fixture(&[("pto.md", PTO)]).await;
        let built = fx.indexer.reindex().await.unwrap();

        fs::remove_file(fx.corpus.join("pto.md")).unwrap();
        let result = fx.indexer.reindex().await;

        assert!(matches!(result, Err(RagError::Ingestion { .. })));
        assert_eq!(fx.store.count().await, built.chunks_indexed);
    }

    #[tokio::test]
    async fn concurrent_reindex_is_rejected() {
        let fx = fixture(&[("pto.md", PTO)]).await;

        let _held = fx.indexer.guard.try_lock().unwrap();
        let result = fx.indexer.reindex().await;

        assert!(matches!(result, Err(RagError::ReindexInProgress)));
    }

    #[tokio::test]
    async fn ensure_index_builds_once_then_reuses() {
        let fx = fixture(&[("pto.md", PTO)]).await;

        assert!(fx.indexer.ensure_index(false).await.unwrap().is_some());
        assert!(fx.indexer.ensure_index(false).await.unwrap().is_none());
        assert!(fx.indexer.ensure_index(true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ensure_index_rebuilds_after_model_change() {
        let fx = fixture(&[("pto.md", PTO)]).await;
        fx.indexer.reindex().await.unwrap();

        let other = Indexer::new(
            Chunker::new(120, 20).unwrap(),
            Arc::new(HashingEmbedder::new(32).unwrap()),
            fx.store.clone(),
            &fx.corpus,
            1,
        );
        let report = other.ensure_index(false).await.unwrap();

        assert!(report.is_some());
        assert_eq!(fx.store.dimension().await, 32);
    }
}
