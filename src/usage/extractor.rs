use super::NormalizedUsage;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use http::HeaderMap;
use serde_json::Value;
use std::convert::Infallible;
use std::time::Instant;

pub const PROMPT_TOKENS_HEADER: &str = "x-usage-prompt-tokens";
pub const COMPLETION_TOKENS_HEADER: &str = "x-usage-completion-tokens";
pub const TOTAL_TOKENS_HEADER: &str = "x-usage-total-tokens";

/// Reads an OpenAI (`prompt_tokens`/`completion_tokens`) or Anthropic and
/// Responses-style (`input_tokens`/`output_tokens`) usage object.
pub fn parse_usage_object(usage: &Value) -> Option<NormalizedUsage> {
    let total = usage.get("total_tokens").and_then(Value::as_u64);

    if let Some(prompt) = usage.get("prompt_tokens").and_then(Value::as_u64) {
        let completion = usage
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        return Some(NormalizedUsage::new(prompt, completion, total));
    }

    if let Some(input) = usage.get("input_tokens").and_then(Value::as_u64) {
        let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        return Some(NormalizedUsage::new(input, output, total));
    }

    None
}

/// Usage from a response body's top-level `usage` object.
pub fn usage_from_json(body: &Value) -> Option<NormalizedUsage> {
    body.get("usage")
        .filter(|u| u.is_object())
        .and_then(parse_usage_object)
}

pub fn usage_from_headers(headers: &HeaderMap) -> Option<NormalizedUsage> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    let prompt = read(PROMPT_TOKENS_HEADER);
    let completion = read(COMPLETION_TOKENS_HEADER);
    if prompt.is_none() && completion.is_none() {
        return None;
    }
    Some(NormalizedUsage::new(
        prompt.unwrap_or(0),
        completion.unwrap_or(0),
        read(TOTAL_TOKENS_HEADER),
    ))
}

/// Usage for a buffered response: the JSON body wins over headers, and a
/// response with neither is recorded as zero.
pub fn extract_non_streaming(body: &[u8], headers: &HeaderMap) -> NormalizedUsage {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(usage_from_json)
        .or_else(|| usage_from_headers(headers))
        .unwrap_or_else(NormalizedUsage::zero)
}

/// Accumulates usage and first-token latency across the `data:` payloads of
/// a streamed response in either dialect.
#[derive(Debug, Default)]
pub struct StreamUsageScanner {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
    first_token_latency_ms: Option<u64>,
}

impl StreamUsageScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, data: &str, elapsed_ms: u64) {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return;
        };

        if self.first_token_latency_ms.is_none() && has_content_delta(&value) {
            self.first_token_latency_ms = Some(elapsed_ms);
        }

        let candidates = [
            value.get("usage"),
            value.get("message").and_then(|m| m.get("usage")),
            value.get("response").and_then(|r| r.get("usage")),
        ];
        for usage in candidates.into_iter().flatten() {
            self.merge(usage);
        }
    }

    fn merge(&mut self, usage: &Value) {
        let prompt = usage
            .get("prompt_tokens")
            .or_else(|| usage.get("input_tokens"))
            .and_then(Value::as_u64);
        if let Some(prompt) = prompt {
            // Anthropic repeats input_tokens as 0 in later frames.
            if prompt > 0 || self.prompt_tokens.is_none() {
                self.prompt_tokens = Some(prompt);
            }
        }

        let completion = usage
            .get("completion_tokens")
            .or_else(|| usage.get("output_tokens"))
            .and_then(Value::as_u64);
        if completion.is_some() {
            self.completion_tokens = completion;
        }

        if let Some(total) = usage.get("total_tokens").and_then(Value::as_u64) {
            self.total_tokens = Some(total);
        }
    }

    pub fn first_token_latency_ms(&self) -> Option<u64> {
        self.first_token_latency_ms
    }

    pub fn finish(self) -> NormalizedUsage {
        NormalizedUsage::new(
            self.prompt_tokens.unwrap_or(0),
            self.completion_tokens.unwrap_or(0),
            self.total_tokens,
        )
        .with_first_token_latency(self.first_token_latency_ms)
    }
}

fn has_content_delta(value: &Value) -> bool {
    let non_empty = |v: Option<&Value>| v.and_then(Value::as_str).map_or(false, |s| !s.is_empty());

    if let Some(choices) = value.get("choices").and_then(Value::as_array) {
        return choices.iter().any(|choice| {
            let delta = &choice["delta"];
            non_empty(delta.get("content"))
                || non_empty(delta.get("reasoning_content"))
                || delta
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .map_or(false, |calls| !calls.is_empty())
        });
    }

    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => {
            let delta = &value["delta"];
            non_empty(delta.get("text"))
                || non_empty(delta.get("partial_json"))
                || non_empty(delta.get("thinking"))
        }
        Some("response.output_text.delta") => non_empty(value.get("delta")),
        _ => false,
    }
}

/// Drain a copy of an upstream event stream and return its usage. Header
/// usage, when present, wins over anything found in the events.
pub async fn scan_stream_usage<S>(stream: S, headers: &HeaderMap, started: Instant) -> NormalizedUsage
where
    S: Stream<Item = Bytes>,
{
    let mut events = Box::pin(stream.map(Ok::<Bytes, Infallible>).eventsource());
    let mut scanner = StreamUsageScanner::new();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => scanner.observe(&event.data, started.elapsed().as_millis() as u64),
            Err(e) => {
                tracing::debug!(error = %e, "Usage scan stopped on malformed event stream");
                break;
            }
        }
    }

    let latency = scanner.first_token_latency_ms();
    match usage_from_headers(headers) {
        Some(usage) => usage.with_first_token_latency(latency),
        None => scanner.finish(),
    }
}
