use super::sse::{event_line, SseFrame, SsePayload};
use super::StreamTranslator;
use crate::transform::response::openai_finish_to_anthropic;
use crate::types::openai::ChatCompletionChunk;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Re-emits chat completion chunks as an Anthropic messages event stream.
///
/// `message_delta`/`message_stop` are held back after the finish chunk until
/// usage is known: OpenAI sends it in a trailing chunk when
/// `stream_options.include_usage` is set.
pub struct OpenAiToAnthropicStream {
    message_id: String,
    model: String,
    started: bool,
    next_block: usize,
    text_block: Option<usize>,
    /// OpenAI tool-call index to the call id last opened there and its
    /// content block index. Some providers reuse index 0 for every call.
    tool_blocks: HashMap<usize, (String, usize)>,
    /// Open blocks in the order they were opened.
    open_blocks: Vec<usize>,
    saw_tool_call: bool,
    pending_stop: Option<&'static str>,
    input_tokens: u64,
    output_tokens: u64,
    finished: bool,
}

impl OpenAiToAnthropicStream {
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            started: false,
            next_block: 0,
            text_block: None,
            tool_blocks: HashMap::new(),
            open_blocks: Vec::new(),
            saw_tool_call: false,
            pending_stop: None,
            input_tokens: 0,
            output_tokens: 0,
            finished: false,
        }
    }

    fn start_message(&mut self, chunk: &ChatCompletionChunk, out: &mut Vec<String>) {
        if self.started {
            return;
        }
        self.started = true;
        if !chunk.id.is_empty() {
            self.message_id = chunk.id.clone();
        }
        if !chunk.model.is_empty() {
            self.model = chunk.model.clone();
        }
        out.push(event_line(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": self.input_tokens, "output_tokens": 0},
                }
            }),
        ));
    }

    fn open_block(&mut self, content_block: Value, out: &mut Vec<String>) -> usize {
        let index = self.next_block;
        self.next_block += 1;
        self.open_blocks.push(index);
        out.push(event_line(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": content_block,
            }),
        ));
        index
    }

    fn close_block(&mut self, index: usize, out: &mut Vec<String>) {
        self.open_blocks.retain(|b| *b != index);
        out.push(event_line(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": index}),
        ));
    }

    fn close_all_blocks(&mut self, out: &mut Vec<String>) {
        for index in std::mem::take(&mut self.open_blocks) {
            out.push(event_line(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": index}),
            ));
        }
        self.text_block = None;
    }

    fn on_text(&mut self, text: &str, out: &mut Vec<String>) {
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.open_block(json!({"type": "text", "text": ""}), out);
                self.text_block = Some(index);
                index
            }
        };
        out.push(event_line(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": text},
            }),
        ));
    }

    fn on_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<String> {
        let mut out = Vec::new();

        if let Some(usage) = &chunk.usage {
            if usage.prompt_tokens > 0 {
                self.input_tokens = usage.prompt_tokens;
            }
            self.output_tokens = usage.completion_tokens;
        }

        self.start_message(&chunk, &mut out);

        if let Some(choice) = chunk.choices.iter().find(|c| c.index == 0) {
            let delta = &choice.delta;

            if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
                self.on_text(text, &mut out);
            }

            for call in &delta.tool_calls {
                let opens = call.id.as_deref().filter(|id| !id.is_empty());
                if let Some(id) = opens {
                    let replaced = match self.tool_blocks.get(&call.index) {
                        Some((open_id, _)) if open_id == id => None,
                        Some((_, block)) => Some(Some(*block)),
                        None => Some(None),
                    };
                    if let Some(previous) = replaced {
                        if let Some(block) = previous {
                            self.close_block(block, &mut out);
                        }
                        if !self.saw_tool_call {
                            self.saw_tool_call = true;
                            if let Some(text_index) = self.text_block.take() {
                                self.close_block(text_index, &mut out);
                            }
                        }
                        let name = call
                            .function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default();
                        let index = self.open_block(
                            json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
                            &mut out,
                        );
                        self.tool_blocks.insert(call.index, (id.to_string(), index));
                    }
                }

                let arguments = call
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.as_deref())
                    .filter(|a| !a.is_empty());
                if let (Some(arguments), Some(index)) =
                    (arguments, self.tool_blocks.get(&call.index).map(|(_, block)| *block))
                {
                    out.push(event_line(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": index,
                            "delta": {"type": "input_json_delta", "partial_json": arguments},
                        }),
                    ));
                }
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                self.close_all_blocks(&mut out);
                self.pending_stop = Some(if self.saw_tool_call {
                    "tool_use"
                } else {
                    openai_finish_to_anthropic(Some(reason))
                });
            }
        }

        if self.pending_stop.is_some() && chunk.usage.is_some() {
            out.extend(self.close_message());
        }
        out
    }

    fn close_message(&mut self) -> Vec<String> {
        if self.finished || !self.started {
            return Vec::new();
        }
        self.finished = true;

        let mut out = Vec::new();
        self.close_all_blocks(&mut out);

        let stop_reason = self.pending_stop.unwrap_or(if self.saw_tool_call {
            "tool_use"
        } else {
            "end_turn"
        });
        out.push(event_line(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {
                    "input_tokens": self.input_tokens,
                    "output_tokens": self.output_tokens,
                },
            }),
        ));
        out.push(event_line("message_stop", &json!({"type": "message_stop"})));
        out
    }
}

impl StreamTranslator for OpenAiToAnthropicStream {
    fn transition(&mut self, frame: &SseFrame) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        match &frame.payload {
            SsePayload::Done => self.close_message(),
            SsePayload::Json(data) => {
                if let Some(error) = data.get("error") {
                    return vec![event_line(
                        "error",
                        &json!({"type": "error", "error": {"type": "api_error", "message": error.get("message").cloned().unwrap_or_else(|| error.clone())}}),
                    )];
                }
                match serde_json::from_value::<ChatCompletionChunk>(data.clone()) {
                    Ok(chunk) => self.on_chunk(chunk),
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping unrecognised completion chunk");
                        Vec::new()
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> Vec<String> {
        self.close_message()
    }
}
