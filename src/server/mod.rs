pub mod anthropic;
pub mod openai;

use crate::backends::TokenStore;
use crate::proxy::Gateway;
use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub tokens: Arc<dyn TokenStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/models", get(openai::list_models))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/responses", post(openai::responses))
        .route("/v1/messages", post(anthropic::messages))
        .route("/v1/*rest", post(openai::passthrough))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Client key from `Authorization: Bearer ...`, falling back to `x-api-key`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim);

    bearer
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .filter(|k| !k.is_empty())
}
