use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::core::errors::APOLOGY_MESSAGE;
use crate::rag::RagError;
use crate::state::AppState;

/// Returned when the corpus yields no indexable documents. Details stay in the log.
pub const NOTHING_INDEXED_MESSAGE: &str =
    "No policy documents could be indexed. The current index is unchanged.";

/// Rebuilds the index from the corpus. The previous index keeps serving
/// until the new one is complete, and stays in place if the rebuild fails.
pub async fn reindex(State(state): State<Arc<AppState>>) -> Response {
    match state.indexer.reindex().await {
        Ok(report) => Json(json!({
            "status": "success",
            "documents_indexed": report.chunks_indexed,
            "documents_loaded": report.documents_loaded,
            "documents_skipped": report.documents_skipped,
        }))
        .into_response(),
        Err(err) => {
            let status = match err {
                RagError::ReindexInProgress => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::error!("Reindex failed: {}", err);
            let message = match err {
                RagError::ReindexInProgress => err.to_string(),
                RagError::Ingestion { .. } => NOTHING_INDEXED_MESSAGE.to_string(),
                _ => APOLOGY_MESSAGE.to_string(),
            };
            (status, Json(json!({"status": "error", "error": message}))).into_response()
        }
    }
}
