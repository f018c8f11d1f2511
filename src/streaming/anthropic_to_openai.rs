use super::sse::{data_line, SseFrame, SsePayload, DONE_LINE};
use super::StreamTranslator;
use crate::transform::response::anthropic_stop_to_openai;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Re-emits an Anthropic messages event stream as chat completion chunks.
pub struct AnthropicToOpenAiStream {
    id: String,
    model: String,
    created: i64,
    input_tokens: u64,
    output_tokens: u64,
    /// Anthropic content block index to OpenAI tool-call slot.
    tool_slots: HashMap<u64, usize>,
    next_tool_slot: usize,
    sent_role: bool,
    done: bool,
}

impl AnthropicToOpenAiStream {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            input_tokens: 0,
            output_tokens: 0,
            tool_slots: HashMap::new(),
            next_tool_slot: 0,
            sent_role: false,
            done: false,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<Value>) -> String {
        let mut chunk = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        if let Some(usage) = usage {
            chunk["usage"] = usage;
        }
        data_line(&chunk)
    }

    fn role_chunk(&mut self, out: &mut Vec<String>) {
        if !self.sent_role {
            self.sent_role = true;
            out.push(self.chunk(json!({"role": "assistant", "content": ""}), None, None));
        }
    }

    fn on_message_start(&mut self, data: &Value) -> Vec<String> {
        let message = &data["message"];
        if let Some(id) = message["id"].as_str().filter(|s| !s.is_empty()) {
            self.id = id.to_string();
        }
        if let Some(model) = message["model"].as_str().filter(|s| !s.is_empty()) {
            self.model = model.to_string();
        }
        if let Some(tokens) = message["usage"]["input_tokens"].as_u64() {
            self.input_tokens = tokens;
        }

        let mut out = Vec::new();
        self.role_chunk(&mut out);
        out
    }

    fn on_block_start(&mut self, data: &Value) -> Vec<String> {
        let block = &data["content_block"];
        if block["type"].as_str() != Some("tool_use") {
            return Vec::new();
        }

        let index = data["index"].as_u64().unwrap_or(0);
        let slot = self.next_tool_slot;
        self.next_tool_slot += 1;
        self.tool_slots.insert(index, slot);

        let mut out = Vec::new();
        self.role_chunk(&mut out);
        out.push(self.chunk(
            json!({
                "tool_calls": [{
                    "index": slot,
                    "id": block["id"],
                    "type": "function",
                    "function": {"name": block["name"], "arguments": ""},
                }]
            }),
            None,
            None,
        ));
        out
    }

    fn on_block_delta(&mut self, data: &Value) -> Vec<String> {
        let delta = &data["delta"];
        let payload = match delta["type"].as_str() {
            Some("text_delta") => match delta["text"].as_str() {
                Some(text) if !text.is_empty() => json!({"content": text}),
                _ => return Vec::new(),
            },
            Some("thinking_delta") => match delta["thinking"].as_str() {
                Some(text) if !text.is_empty() => json!({"reasoning_content": text}),
                _ => return Vec::new(),
            },
            Some("input_json_delta") => {
                let index = data["index"].as_u64().unwrap_or(0);
                let Some(slot) = self.tool_slots.get(&index).copied() else {
                    return Vec::new();
                };
                json!({
                    "tool_calls": [{
                        "index": slot,
                        "function": {"arguments": delta["partial_json"].as_str().unwrap_or("")},
                    }]
                })
            }
            _ => return Vec::new(),
        };

        let mut out = Vec::new();
        self.role_chunk(&mut out);
        out.push(self.chunk(payload, None, None));
        out
    }

    fn on_message_delta(&mut self, data: &Value) -> Vec<String> {
        if let Some(tokens) = data["usage"]["output_tokens"].as_u64() {
            self.output_tokens = tokens;
        }
        if let Some(tokens) = data["usage"]["input_tokens"].as_u64().filter(|t| *t > 0) {
            self.input_tokens = tokens;
        }

        let Some(reason) = data["delta"]["stop_reason"].as_str() else {
            return Vec::new();
        };
        let usage = json!({
            "prompt_tokens": self.input_tokens,
            "completion_tokens": self.output_tokens,
            "total_tokens": self.input_tokens + self.output_tokens,
        });
        vec![self.chunk(json!({}), Some(anthropic_stop_to_openai(Some(reason))), Some(usage))]
    }

    fn done(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![DONE_LINE.to_string()]
    }
}

impl StreamTranslator for AnthropicToOpenAiStream {
    fn transition(&mut self, frame: &SseFrame) -> Vec<String> {
        let SsePayload::Json(data) = &frame.payload else {
            return Vec::new();
        };
        if self.done {
            return Vec::new();
        }

        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .or(frame.event.as_deref())
            .unwrap_or_default();

        match kind {
            "message_start" => self.on_message_start(data),
            "content_block_start" => self.on_block_start(data),
            "content_block_delta" => self.on_block_delta(data),
            "message_delta" => self.on_message_delta(data),
            "message_stop" => self.done(),
            "error" => vec![data_line(&json!({"error": data["error"]}))],
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<String> {
        self.done()
    }
}
