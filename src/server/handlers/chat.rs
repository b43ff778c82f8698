use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::rag::ChatResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequestBody>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(body) = payload.map_err(|rejection| {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let message = body
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No message provided".to_string()))?;

    let max_chars = state.settings.server.max_message_chars;
    let length = message.chars().count();
    if max_chars > 0 && length > max_chars {
        return Err(ApiError::BadRequest(format!(
            "Message is too long ({length} characters, limit {max_chars})"
        )));
    }

    let request_id = Uuid::new_v4();
    tracing::info!(request_id = %request_id, "Chat request ({} chars)", length);

    match state.pipeline.answer(message).await {
        Ok(response) => {
            tracing::info!(
                request_id = %request_id,
                "Answered in {} ms with {} sources",
                response.latency_ms,
                response.sources.len()
            );
            Ok(Json(response))
        }
        Err(err) => {
            tracing::error!(request_id = %request_id, "Chat request failed: {}", err);
            Err(ApiError::from(err))
        }
    }
}
