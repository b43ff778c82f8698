use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::config::ServerSettings;
use crate::core::errors::ApiError;
use crate::server::handlers::{chat, health, reindex};
use crate::state::AppState;

/// Creates the application router with all routes and middleware.
///
/// This function sets up:
/// - CORS middleware
/// - Per-request timeout
/// - Health check, chat and reindex endpoints
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server);
    let timeout = state.settings.request_timeout();

    Router::new()
        .route("/health", get(health::health))
        .route("/chat", post(chat::chat))
        .route("/api/reindex", post(reindex::reindex))
        .with_state(state)
        .layer(middleware::from_fn_with_state(timeout, enforce_timeout))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

/// Abandons a request that runs past `limit` and answers with the generic
/// apology instead of an empty body.
async fn enforce_timeout(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::ServiceUnavailable(format!(
            "{} did not complete within {:?}",
            path, limit
        ))
        .into_response(),
    }
}

fn build_cors_layer(settings: &ServerSettings) -> CorsLayer {
    let configured: Vec<String> = settings
        .cors_allowed_origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect();

    let origins = if configured.is_empty() {
        default_local_origins(settings.port)
    } else {
        configured
    };

    let allow_origin = AllowOrigin::list(
        origins
            .into_iter()
            .filter_map(|origin| HeaderValue::from_str(&origin).ok())
            .collect::<Vec<_>>(),
    );

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn default_local_origins(port: u16) -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        format!("http://localhost:{port}"),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        format!("http://127.0.0.1:{port}"),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
