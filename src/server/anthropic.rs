use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::HeaderMap,
    response::Response,
};

use super::{extract_api_key, AppState};
use crate::proxy::{Endpoint, EndpointKind};

/// Anthropic Messages endpoint. Errors raised by the gateway itself use the
/// Anthropic error envelope; upstream failures pass through untouched.
pub async fn messages(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let endpoint = Endpoint::new(EndpointKind::Messages, "/v1/messages", query);

    let result = match state.tokens.authenticate(extract_api_key(&headers)).await {
        Ok(token) => state.gateway.handle(&token, endpoint, &headers, body).await,
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| e.into_anthropic_response())
}
