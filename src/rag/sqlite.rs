//! SQLite-backed index store.
//!
//! Entries are persisted in SQLite and served from an in-memory snapshot with
//! brute-force cosine search. A bulk replace writes the new set in a single
//! transaction and only then swaps the snapshot, so queries observe either the
//! old set or the new one.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use super::chunker::Chunk;
use super::error::RagError;
use super::store::{
    uniform_dimension, IndexEntry, IndexMetadata, IndexSnapshot, IndexStore, ScoredEntry,
};

const META_EMBEDDING_MODEL: &str = "embedding_model";
const META_UPDATED_AT: &str = "updated_at";

pub struct SqliteIndexStore {
    pool: SqlitePool,
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl SqliteIndexStore {
    /// Opens (or creates) the index at `db_path` and loads it into memory.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, RagError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(RagError::store)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                RagError::StoreUnavailable(format!("cannot open {}: {}", db_path.display(), e))
            })?;

        let store = Self {
            pool,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
        };
        store.init_schema().await?;

        let loaded = store.load_snapshot().await?;
        tracing::info!(
            "Opened index {} with {} entries",
            db_path.display(),
            loaded.len()
        );
        *store.snapshot.write().await = Arc::new(loaded);
        Ok(store)
    }

    /// Current snapshot. Holding it never blocks a concurrent replace.
    pub async fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().await.clone()
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_entries (
                position INTEGER PRIMARY KEY,
                chunk_id TEXT NOT NULL,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;

        Ok(())
    }

    async fn load_snapshot(&self) -> Result<IndexSnapshot, RagError> {
        let rows = sqlx::query(
            "SELECT source, title, content, start_offset, chunk_index, embedding
             FROM index_entries
             ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::store)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(Self::row_to_entry(row)?);
        }

        let meta: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM index_meta")
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::store)?;

        let mut metadata = IndexMetadata::default();
        for (key, value) in meta {
            match key.as_str() {
                META_EMBEDDING_MODEL => metadata.embedding_model = Some(value),
                META_UPDATED_AT => metadata.updated_at = Some(value),
                _ => {}
            }
        }

        IndexSnapshot::build(entries, metadata)
            .map_err(|e| RagError::StoreUnavailable(format!("persisted index is corrupt: {e}")))
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<IndexEntry, RagError> {
        let source: String = row.get("source");
        let start_offset: i64 = row.get("start_offset");
        let chunk_index: i64 = row.get("chunk_index");
        let blob: Vec<u8> = row.get("embedding");
        let embedding = deserialize_embedding(&blob).ok_or_else(|| {
            RagError::StoreUnavailable(format!(
                "embedding for {source}#{chunk_index} has a malformed length ({} bytes)",
                blob.len()
            ))
        })?;

        Ok(IndexEntry {
            chunk: Chunk {
                source,
                title: row.get("title"),
                text: row.get("content"),
                start_offset: start_offset as usize,
                chunk_index: chunk_index as usize,
            },
            embedding,
        })
    }

    async fn persist(&self, entries: &[IndexEntry], metadata: &IndexMetadata) -> Result<(), RagError> {
        let mut tx = self.pool.begin().await.map_err(RagError::store)?;

        sqlx::query("DELETE FROM index_entries")
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;

        for (position, entry) in entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO index_entries
                    (position, chunk_id, source, title, content, start_offset, chunk_index, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(position as i64)
            .bind(entry.chunk.id())
            .bind(&entry.chunk.source)
            .bind(&entry.chunk.title)
            .bind(&entry.chunk.text)
            .bind(entry.chunk.start_offset as i64)
            .bind(entry.chunk.chunk_index as i64)
            .bind(serialize_embedding(&entry.embedding))
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;
        }

        let meta = [
            (META_EMBEDDING_MODEL, metadata.embedding_model.clone()),
            (META_UPDATED_AT, metadata.updated_at.clone()),
        ];
        for (key, value) in meta {
            let Some(value) = value else { continue };
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(RagError::store)?;
        }

        tx.commit().await.map_err(RagError::store)
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn upsert_batch(
        &self,
        entries: Vec<IndexEntry>,
        embedding_model: &str,
    ) -> Result<usize, RagError> {
        let metadata = IndexMetadata {
            embedding_model: Some(embedding_model.to_string()),
            dimension: 0,
            updated_at: Some(Utc::now().to_rfc3339()),
        };

        // Validate before touching disk so a bad batch leaves the old set in place.
        uniform_dimension(&entries)?;

        self.persist(&entries, &metadata).await?;

        let next = IndexSnapshot::build(entries, metadata)?;
        let count = next.len();
        *self.snapshot.write().await = Arc::new(next);
        tracing::debug!("Index replaced with {} entries", count);
        Ok(count)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>, RagError> {
        let snapshot = self.snapshot().await;
        snapshot.search(vector, k)
    }

    async fn count(&self) -> usize {
        self.snapshot.read().await.len()
    }

    async fn metadata(&self) -> IndexMetadata {
        self.snapshot.read().await.metadata().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, index: usize, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                source: source.to_string(),
                title: "Title".to_string(),
                text: format!("{source} body {index}"),
                start_offset: index * 10,
                chunk_index: index,
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn upsert_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::open(dir.path().join("index.db"))
            .await
            .unwrap();
        assert_eq!(store.count().await, 0);

        let written = store
            .upsert_batch(
                vec![
                    entry("a.md", 0, vec![1.0, 0.0, 0.0]),
                    entry("b.md", 0, vec![0.0, 1.0, 0.0]),
                ],
                "model-a",
            )
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.count().await, 2);

        let hits = store.query(&[1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source, "a.md");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn entries_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");
        {
            let store = SqliteIndexStore::open(&path).await.unwrap();
            store
                .upsert_batch(
                    vec![entry("a.md", 0, vec![0.5, 0.5]), entry("a.md", 1, vec![0.1, 0.9])],
                    "model-a",
                )
                .await
                .unwrap();
        }

        let reopened = SqliteIndexStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await, 2);
        let meta = reopened.metadata().await;
        assert_eq!(meta.embedding_model.as_deref(), Some("model-a"));
        assert_eq!(meta.dimension, 2);

        let snapshot = reopened.snapshot().await;
        assert_eq!(snapshot.chunks()[1].chunk_index, 1);
        assert_eq!(snapshot.chunks()[1].start_offset, 10);
        assert_eq!(snapshot.chunks()[1].text, "a.md body 1");
    }

    #[tokio::test]
    async fn upsert_replaces_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::open(dir.path().join("index.db"))
            .await
            .unwrap();

        store
            .upsert_batch(vec![entry("old.md", 0, vec![1.0, 0.0])], "m")
            .await
            .unwrap();
        store
            .upsert_batch(
                vec![entry("new.md", 0, vec![1.0, 0.0]), entry("new.md", 1, vec![0.0, 1.0])],
                "m",
            )
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.source == "new.md"));
    }

    #[tokio::test]
    async fn mixed_dimensions_are_rejected_and_old_set_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let store = SqliteIndexStore::open(&path).await.unwrap();
        store
            .upsert_batch(vec![entry("keep.md", 0, vec![1.0, 0.0])], "m")
            .await
            .unwrap();

        let result = store
            .upsert_batch(
                vec![entry("x.md", 0, vec![1.0, 0.0]), entry("x.md", 1, vec![1.0])],
                "m",
            )
            .await;
        assert!(matches!(result, Err(RagError::Query(_))));
        assert_eq!(store.count().await, 1);

        drop(store);
        let reopened = SqliteIndexStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot().await.chunks()[0].source, "keep.md");
    }

    #[tokio::test]
    async fn query_with_wrong_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::open(dir.path().join("index.db"))
            .await
            .unwrap();
        store
            .upsert_batch(vec![entry("a.md", 0, vec![1.0, 0.0])], "m")
            .await
            .unwrap();

        let result = store.query(&[1.0, 0.0, 0.0], 3).await;
        assert!(matches!(result, Err(RagError::Query(_))));
    }

    #[tokio::test]
    async fn unopenable_path_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let result = SqliteIndexStore::open(dir.path()).await;
        assert!(matches!(result, Err(RagError::StoreUnavailable(_))));
    }

    #[test]
    fn malformed_blob_is_rejected() {
        assert!(deserialize_embedding(&[0, 0, 0]).is_none());
        assert!(deserialize_embedding(&[]).is_none());
        assert_eq!(
            deserialize_embedding(&serialize_embedding(&[1.5, -2.0])),
            Some(vec![1.5, -2.0])
        );
    }
}
