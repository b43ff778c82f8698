use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::config::{AppPaths, Settings};
use crate::embedding::{self, Embedder};
use crate::llm::{AnswerGenerator, LlmProvider, OpenAiCompatProvider};
use crate::rag::{
    ChatPipeline, Chunker, ContextBuilder, ContextBuilderConfig, Indexer, IndexStore, RagError,
    Retriever, SqliteIndexStore,
};

pub mod error;

pub use error::InitializationError;

/// Global application state shared across all routes.
///
/// Everything here is read-mostly and shared by `Arc`; the only mutable
/// piece is the index snapshot inside the store, replaced by the indexer.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn IndexStore>,
    pub indexer: Arc<Indexer>,
    pub pipeline: Arc<ChatPipeline>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// This process includes:
    /// 1. Validating settings
    /// 2. Connecting the embedding model and opening the index store
    /// 3. Loading the persisted index, or building it from the corpus
    /// 4. Wiring the retrieval and generation pipeline
    pub async fn initialize(
        paths: &AppPaths,
        settings: Settings,
    ) -> Result<Arc<Self>, InitializationError> {
        settings.validate().map_err(InitializationError::Config)?;

        let embedder = embedding::from_settings(&settings.embedding, &paths.models_dir)
            .await
            .map_err(InitializationError::Embedding)?;

        let store: Arc<dyn IndexStore> = Arc::new(
            SqliteIndexStore::open(&paths.index_db_path)
                .await
                .map_err(InitializationError::Store)?,
        );

        let provider: Arc<dyn LlmProvider> = Arc::new(
            OpenAiCompatProvider::new(&settings.generator)
                .map_err(InitializationError::Generator)?,
        );

        let state = Self::from_parts(paths, settings, embedder, store, provider)?;

        match state
            .indexer
            .ensure_index(state.settings.index.rebuild_on_start)
            .await
        {
            Ok(_) => {}
            // A missing or empty corpus leaves whatever index exists serving.
            Err(err @ RagError::Ingestion { .. }) => {
                tracing::warn!("Startup indexing skipped: {}", err);
            }
            Err(err) => return Err(InitializationError::Index(err)),
        }

        tracing::info!(
            "Application state ready ({} indexed chunks)",
            state.store.count().await
        );
        Ok(Arc::new(state))
    }

    /// Wires the components without touching the corpus.
    pub fn from_parts(
        paths: &AppPaths,
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, InitializationError> {
        let chunker =
            Chunker::from_settings(&settings.chunking).map_err(InitializationError::Config)?;

        let indexer = Arc::new(Indexer::new(
            chunker,
            embedder.clone(),
            store.clone(),
            paths.corpus_dir.clone(),
            settings.embedding.concurrency,
        ));

        let pipeline = Arc::new(ChatPipeline::new(
            Retriever::from_settings(embedder.clone(), store.clone(), &settings.retrieval),
            ContextBuilder::new(ContextBuilderConfig::from(&settings.context)),
            AnswerGenerator::new(provider, &settings.generator),
            settings.retrieval.refusal_message.clone(),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            embedder,
            store,
            indexer,
            pipeline,
            started_at: Utc::now(),
        })
    }
}
