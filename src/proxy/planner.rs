//! Builds the upstream URL, body and headers for one candidate channel.

use super::envelope::{Dialect, Endpoint, EndpointKind, InboundRequest, RequestEnvelope};
use super::selector::Candidate;
use crate::config::{ApiFormat, GatewayConfig};
use crate::transform::headers::base_headers;
use crate::transform::model::{ensure_stream_usage, rewrite_model_field};
use crate::transform::request::{anthropic_to_openai, openai_to_anthropic};
use crate::types::{GatewayError, Result};
use bytes::Bytes;
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;

/// How the upstream response must be rewritten for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTranslation {
    None,
    AnthropicToOpenAi,
    OpenAiToAnthropic,
}

/// Second route tried once with the same key when a Responses request is
/// rejected by an OpenAI-format channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackRoute {
    pub url: String,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub body: Bytes,
    /// Key-independent headers; credentials are added per attempt.
    pub headers: HeaderMap,
    pub stream_usage_injected: bool,
    pub fallback: Option<FallbackRoute>,
    pub translation: ResponseTranslation,
}

/// Strip a trailing `/` and a trailing `/v1` so paths can be appended.
pub fn normalize_base_url(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    trimmed
        .strip_suffix("/v1")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
        .to_string()
}

pub struct RequestPlanner<'a> {
    endpoint: &'a Endpoint,
    envelope: &'a RequestEnvelope,
    inbound_headers: &'a HeaderMap,
    config: &'a GatewayConfig,
}

impl<'a> RequestPlanner<'a> {
    pub fn new(
        endpoint: &'a Endpoint,
        envelope: &'a RequestEnvelope,
        inbound_headers: &'a HeaderMap,
        config: &'a GatewayConfig,
    ) -> Self {
        Self {
            endpoint,
            envelope,
            inbound_headers,
            config,
        }
    }

    pub fn prepare(&self, candidate: &Candidate) -> Result<PreparedRequest> {
        let channel = &candidate.channel;
        let headers = base_headers(
            channel.api_format,
            self.inbound_headers,
            &self.config.anthropic_version,
        )?;

        match channel.api_format {
            ApiFormat::OpenAI => self.prepare_openai(candidate, headers),
            ApiFormat::Anthropic => self.prepare_anthropic(candidate, headers),
            ApiFormat::Custom => Ok(PreparedRequest {
                url: format!("{}{}", channel.base_url, self.endpoint.query_suffix()),
                body: self.envelope.raw_body.clone(),
                headers,
                stream_usage_injected: false,
                fallback: None,
                translation: ResponseTranslation::None,
            }),
        }
    }

    fn prepare_openai(&self, candidate: &Candidate, headers: HeaderMap) -> Result<PreparedRequest> {
        let base = normalize_base_url(&candidate.channel.base_url);
        let query = self.endpoint.query_suffix();

        let (url, body, translation) = match self.endpoint.kind.dialect() {
            Dialect::OpenAI => {
                let json = self.json_body()?;
                (
                    format!("{}{}{}", base, self.endpoint.path, query),
                    rewrite_model_field(json, &candidate.model)?,
                    ResponseTranslation::None,
                )
            }
            Dialect::Anthropic => {
                let InboundRequest::AnthropicMessages(req) = &self.envelope.request else {
                    return Err(GatewayError::Transform(
                        "messages request was not parsed".to_string(),
                    ));
                };
                let translated = anthropic_to_openai(req.clone(), &candidate.model);
                (
                    format!("{}/v1/chat/completions", base),
                    to_value(&translated)?,
                    ResponseTranslation::OpenAiToAnthropic,
                )
            }
        };

        let fallback = if self.endpoint.kind == EndpointKind::Responses {
            Some(FallbackRoute {
                url: format!("{}/v1/chat/completions{}", base, query),
                body: to_bytes(&body)?,
            })
        } else {
            None
        };

        let mut body = body;
        let stream_usage_injected = self.envelope.stream && ensure_stream_usage(&mut body);

        Ok(PreparedRequest {
            url,
            body: to_bytes(&body)?,
            headers,
            stream_usage_injected,
            fallback,
            translation,
        })
    }

    fn prepare_anthropic(&self, candidate: &Candidate, headers: HeaderMap) -> Result<PreparedRequest> {
        let base = normalize_base_url(&candidate.channel.base_url);

        let (body, translation, query) = match &self.envelope.request {
            InboundRequest::AnthropicMessages(_) => (
                rewrite_model_field(self.json_body()?, &candidate.model)?,
                ResponseTranslation::None,
                self.endpoint.query_suffix(),
            ),
            InboundRequest::OpenAiChat(req) => {
                let translated = openai_to_anthropic(
                    req.clone(),
                    &candidate.model,
                    self.config.default_max_tokens,
                );
                (
                    to_value(&translated)?,
                    ResponseTranslation::AnthropicToOpenAi,
                    String::new(),
                )
            }
            InboundRequest::Passthrough => {
                return Err(GatewayError::Transform(format!(
                    "anthropic channel '{}' cannot serve {}",
                    candidate.channel.name, self.endpoint.path
                )));
            }
        };

        Ok(PreparedRequest {
            url: format!("{}/v1/messages{}", base, query),
            body: to_bytes(&body)?,
            headers,
            stream_usage_injected: false,
            fallback: None,
            translation,
        })
    }

    fn json_body(&self) -> Result<Value> {
        self.envelope
            .json
            .clone()
            .ok_or_else(|| GatewayError::InvalidRequest("request body is not JSON".to_string()))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::Transform(format!("failed to encode request: {}", e)))
}

fn to_bytes(value: &Value) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| GatewayError::Transform(format!("failed to encode request: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Channel, ChannelModel, ChannelStatus};
    use serde_json::json;
    use std::collections::HashMap;

    fn candidate(format: ApiFormat, base_url: &str, model: &str) -> Candidate {
        Candidate {
            channel: Channel {
                id: "1".to_string(),
                name: "ch".to_string(),
                base_url: base_url.to_string(),
                api_keys: vec!["k".to_string()],
                weight: 1,
                status: ChannelStatus::Active,
                api_format: format,
                models: vec![ChannelModel::new(model)],
                custom_headers: HashMap::new(),
            },
            model: model.to_string(),
        }
    }

    fn plan(
        kind: EndpointKind,
        path: &str,
        query: Option<&str>,
        body: Value,
        candidate: &Candidate,
    ) -> PreparedRequest {
        let endpoint = Endpoint::new(kind, path, query.map(String::from));
        let envelope = RequestEnvelope::parse(&endpoint, Bytes::from(body.to_string())).unwrap();
        let config = GatewayConfig::default();
        let headers = HeaderMap::new();
        RequestPlanner::new(&endpoint, &envelope, &headers, &config)
            .prepare(candidate)
            .unwrap()
    }

    fn body_json(prepared: &PreparedRequest) -> Value {
        serde_json::from_slice(&prepared.body).unwrap()
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://api.openai.com/v1/"), "https://api.openai.com");
        assert_eq!(normalize_base_url("https://api.openai.com/v1"), "https://api.openai.com");
        assert_eq!(normalize_base_url("https://host/proxy/"), "https://host/proxy");
        assert_eq!(normalize_base_url("https://host"), "https://host");
    }

    #[test]
    fn test_openai_chat_passthrough_with_model_and_query() {
        let c = candidate(ApiFormat::OpenAI, "https://api.openai.com/v1", "gpt-4-0613");
        let prepared = plan(
            EndpointKind::ChatCompletions,
            "/v1/chat/completions",
            Some("api-version=2"),
            json!({"model": "gpt4", "messages": [], "seed": 7}),
            &c,
        );
        assert_eq!(prepared.url, "https://api.openai.com/v1/chat/completions?api-version=2");
        let body = body_json(&prepared);
        assert_eq!(body["model"], "gpt-4-0613");
        assert_eq!(body["seed"], 7);
        assert!(body.get("stream_options").is_none());
        assert!(!prepared.stream_usage_injected);
        assert!(prepared.fallback.is_none());
        assert_eq!(prepared.translation, ResponseTranslation::None);
    }

    #[test]
    fn test_openai_stream_injects_usage() {
        let c = candidate(ApiFormat::OpenAI, "https://api.openai.com", "gpt-4");
        let prepared = plan(
            EndpointKind::ChatCompletions,
            "/v1/chat/completions",
            None,
            json!({"model": "gpt-4", "messages": [], "stream": true}),
            &c,
        );
        assert!(prepared.stream_usage_injected);
        assert_eq!(body_json(&prepared)["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_responses_fallback_body_has_no_injection() {
        let c = candidate(ApiFormat::OpenAI, "https://api.openai.com/v1", "o3");
        let prepared = plan(
            EndpointKind::Responses,
            "/v1/responses",
            None,
            json!({"model": "o3", "input": "hi", "stream": true}),
            &c,
        );
        assert_eq!(prepared.url, "https://api.openai.com/v1/responses");
        assert!(prepared.stream_usage_injected);

        let fallback = prepared.fallback.unwrap();
        assert_eq!(fallback.url, "https://api.openai.com/v1/chat/completions");
        let fallback_body: Value = serde_json::from_slice(&fallback.body).unwrap();
        assert!(fallback_body.get("stream_options").is_none());
        assert_eq!(fallback_body["model"], "o3");
    }

    #[test]
    fn test_openai_chat_to_anthropic_channel() {
        let c = candidate(ApiFormat::Anthropic, "https://api.anthropic.com/", "claude-3");
        let prepared = plan(
            EndpointKind::ChatCompletions,
            "/v1/chat/completions",
            Some("ignored=1"),
            json!({
                "model": "claude",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hi"}
                ]
            }),
            &c,
        );
        assert_eq!(prepared.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(prepared.translation, ResponseTranslation::AnthropicToOpenAi);
        let body = body_json(&prepared);
        assert_eq!(body["model"], "claude-3");
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(prepared.headers.get("anthropic-version").unwrap(), "2023-06-01");
    }

    #[test]
    fn test_messages_to_anthropic_channel_passthrough() {
        let c = candidate(ApiFormat::Anthropic, "https://api.anthropic.com/v1", "claude-3-opus");
        let prepared = plan(
            EndpointKind::Messages,
            "/v1/messages",
            Some("beta=true"),
            json!({
                "model": "opus",
                "max_tokens": 10,
                "messages": [{"role": "user", "content": "hi"}],
                "thinking": {"type": "enabled", "budget_tokens": 1024}
            }),
            &c,
        );
        assert_eq!(prepared.url, "https://api.anthropic.com/v1/messages?beta=true");
        let body = body_json(&prepared);
        assert_eq!(body["model"], "claude-3-opus");
        assert_eq!(body["thinking"]["budget_tokens"], 1024);
        assert_eq!(prepared.translation, ResponseTranslation::None);
    }

    #[test]
    fn test_messages_to_openai_channel() {
        let c = candidate(ApiFormat::OpenAI, "https://api.openai.com", "gpt-4o");
        let prepared = plan(
            EndpointKind::Messages,
            "/v1/messages",
            None,
            json!({
                "model": "claude",
                "max_tokens": 10,
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            }),
            &c,
        );
        assert_eq!(prepared.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(prepared.translation, ResponseTranslation::OpenAiToAnthropic);
        let body = body_json(&prepared);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_custom_channel_sends_raw_body() {
        let c = candidate(ApiFormat::Custom, "https://gateway.local/run", "m");
        let raw = json!({"model": "alias", "messages": []});
        let prepared = plan(
            EndpointKind::ChatCompletions,
            "/v1/chat/completions",
            Some("x=1"),
            raw.clone(),
            &c,
        );
        assert_eq!(prepared.url, "https://gateway.local/run?x=1");
        assert_eq!(body_json(&prepared), raw);
    }
}
