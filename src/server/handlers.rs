use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::AppState;
use crate::error::{ProviderError, SearchError};
use crate::store::{SearchResult, VectorStore};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

pub enum ApiError {
    Search(SearchError),
    BadRequest(String),
    Internal(String),
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        Self::Search(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Search(err) => {
                let status = match &err {
                    SearchError::Validation(_) => StatusCode::BAD_REQUEST,
                    SearchError::Provider(ProviderError::Timeout) | SearchError::Timeout(_) => {
                        StatusCode::GATEWAY_TIMEOUT
                    }
                    SearchError::Provider(_) => StatusCode::BAD_GATEWAY,
                    SearchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status != StatusCode::BAD_REQUEST {
                    error!(error = %err, "search failed");
                }
                (status, err.to_string())
            }
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => {
                error!(error = %message, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// GET / - liveness
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /status - what the loaded index holds
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let index = state.service.store();
    let binding = index.binding().map_err(|e| ApiError::Search(e.into()))?;
    let embedded = index.embedded_count().map_err(|e| ApiError::Search(e.into()))?;
    Ok(Json(json!({
        "movies": state.stored_movies,
        "embedded": embedded,
        "model": binding.as_ref().map(|b| b.model.clone()),
        "dimensions": binding.map(|b| b.dimensions),
    })))
}

/// POST /search
pub async fn search(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    // Reject bad input before touching the thread pool.
    state.service.validate(&req.query, req.limit)?;

    let timeout = state.timeout;
    let task = tokio::task::spawn_blocking(move || state.service.search(&req.query, req.limit));
    let results = match tokio::time::timeout(timeout, task).await {
        Err(_) => return Err(SearchError::Timeout(timeout.as_secs()).into()),
        Ok(Err(join)) => return Err(ApiError::Internal(format!("search task failed: {join}"))),
        Ok(Ok(result)) => result?,
    };

    Ok(Json(SearchResponse { results }))
}
