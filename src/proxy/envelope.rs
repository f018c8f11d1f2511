use crate::types::anthropic::MessagesRequest;
use crate::types::openai::ChatCompletionRequest;
use crate::types::{GatewayError, Result};
use bytes::Bytes;
use serde_json::Value;

/// Client-facing wire dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAI,
    Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    ChatCompletions,
    /// The modern `/v1/responses` surface.
    Responses,
    Messages,
    /// Any other OpenAI-style path, proxied as-is.
    Passthrough,
}

impl EndpointKind {
    pub fn dialect(&self) -> Dialect {
        match self {
            EndpointKind::Messages => Dialect::Anthropic,
            _ => Dialect::OpenAI,
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, EndpointKind::ChatCompletions | EndpointKind::Messages)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub path: String,
    pub query: Option<String>,
}

impl Endpoint {
    pub fn new(kind: EndpointKind, path: impl Into<String>, query: Option<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            query: query.filter(|q| !q.is_empty()),
        }
    }

    pub fn query_suffix(&self) -> String {
        self.query
            .as_deref()
            .map(|q| format!("?{}", q))
            .unwrap_or_default()
    }
}

/// Typed view of the inbound body, validated once at the boundary.
#[derive(Debug, Clone)]
pub enum InboundRequest {
    OpenAiChat(ChatCompletionRequest),
    AnthropicMessages(MessagesRequest),
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub raw_body: Bytes,
    pub json: Option<Value>,
    pub request: InboundRequest,
    pub model: String,
    pub stream: bool,
    pub reasoning_effort: Option<String>,
}

impl RequestEnvelope {
    pub fn parse(endpoint: &Endpoint, raw_body: Bytes) -> Result<Self> {
        let json: Option<Value> = serde_json::from_slice(&raw_body).ok();
        let Some(body) = json.as_ref().filter(|v| v.is_object()) else {
            return Err(GatewayError::InvalidRequest(
                "missing 'model' field: request body is not a JSON object".to_string(),
            ));
        };

        let model = body
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("missing 'model' field".to_string()))?
            .to_string();

        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

        let reasoning_effort = body
            .get("reasoning_effort")
            .or_else(|| body.get("reasoning").and_then(|r| r.get("effort")))
            .and_then(Value::as_str)
            .map(str::to_string);

        let request = match endpoint.kind {
            EndpointKind::ChatCompletions => InboundRequest::OpenAiChat(
                serde_json::from_value(body.clone()).map_err(|e| {
                    GatewayError::InvalidRequest(format!("invalid chat completion request: {}", e))
                })?,
            ),
            EndpointKind::Messages => InboundRequest::AnthropicMessages(
                serde_json::from_value(body.clone()).map_err(|e| {
                    GatewayError::InvalidRequest(format!("invalid messages request: {}", e))
                })?,
            ),
            EndpointKind::Responses | EndpointKind::Passthrough => InboundRequest::Passthrough,
        };

        Ok(Self {
            raw_body,
            json,
            request,
            model,
            stream,
            reasoning_effort,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint(kind: EndpointKind) -> Endpoint {
        Endpoint::new(kind, "/v1/chat/completions", None)
    }

    #[test]
    fn test_parse_chat_request() {
        let body = json!({
            "model": "gpt-4",
            "stream": true,
            "reasoning_effort": "high",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let env = RequestEnvelope::parse(
            &endpoint(EndpointKind::ChatCompletions),
            Bytes::from(body.to_string()),
        )
        .unwrap();
        assert_eq!(env.model, "gpt-4");
        assert!(env.stream);
        assert_eq!(env.reasoning_effort.as_deref(), Some("high"));
        assert!(matches!(env.request, InboundRequest::OpenAiChat(_)));
    }

    #[test]
    fn test_parse_responses_reasoning_effort() {
        let body = json!({"model": "o3", "input": "hi", "reasoning": {"effort": "low"}});
        let env = RequestEnvelope::parse(
            &endpoint(EndpointKind::Responses),
            Bytes::from(body.to_string()),
        )
        .unwrap();
        assert_eq!(env.reasoning_effort.as_deref(), Some("low"));
        assert!(!env.stream);
        assert!(matches!(env.request, InboundRequest::Passthrough));
    }

    #[test]
    fn test_parse_rejects_non_json_and_missing_model() {
        let err = RequestEnvelope::parse(
            &endpoint(EndpointKind::Passthrough),
            Bytes::from_static(b"--boundary\r\nContent-Disposition: form-data; name=\"file\"\r\n"),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        assert!(err.to_string().contains("missing 'model' field"));

        let err = RequestEnvelope::parse(
            &endpoint(EndpointKind::ChatCompletions),
            Bytes::from(json!({"messages": []}).to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_endpoint_kinds() {
        assert!(EndpointKind::ChatCompletions.is_chat());
        assert!(EndpointKind::Messages.is_chat());
        assert!(!EndpointKind::Responses.is_chat());
        assert!(!EndpointKind::Passthrough.is_chat());
        assert_eq!(EndpointKind::Messages.dialect(), Dialect::Anthropic);

        let ep = Endpoint::new(EndpointKind::Passthrough, "/v1/embeddings", Some(String::new()));
        assert_eq!(ep.query_suffix(), "");
        let ep = Endpoint::new(EndpointKind::Passthrough, "/v1/embeddings", Some("a=1".into()));
        assert_eq!(ep.query_suffix(), "?a=1");
    }
}
