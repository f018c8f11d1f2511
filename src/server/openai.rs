use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, Uri},
    response::Response,
    Json,
};
use serde_json::{json, Value};

use super::{extract_api_key, AppState};
use crate::{
    proxy::{Endpoint, EndpointKind},
    types::Result,
};

pub async fn chat_completions(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let endpoint = Endpoint::new(EndpointKind::ChatCompletions, "/v1/chat/completions", query);
    forward(&state, endpoint, &headers, body).await
}

pub async fn responses(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let endpoint = Endpoint::new(EndpointKind::Responses, "/v1/responses", query);
    forward(&state, endpoint, &headers, body).await
}

/// Any other `/v1/...` path, forwarded as-is to OpenAI and custom channels.
pub async fn passthrough(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let query = uri.query().map(str::to_string);
    let endpoint = Endpoint::new(EndpointKind::Passthrough, uri.path(), query);
    forward(&state, endpoint, &headers, body).await
}

pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    let token = state.tokens.authenticate(extract_api_key(&headers)).await?;
    let models = state.gateway.list_models(&token).await?;

    let data: Vec<Value> = models
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 0,
                "owned_by": "llm-gateway",
            })
        })
        .collect();

    Ok(Json(json!({ "object": "list", "data": data })))
}

async fn forward(
    state: &AppState,
    endpoint: Endpoint,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let token = state.tokens.authenticate(extract_api_key(headers)).await?;
    state.gateway.handle(&token, endpoint, headers, body).await
}
