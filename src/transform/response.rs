//! Non-streaming response translation.

use crate::transform::request::parse_arguments;
use crate::types::anthropic::{self, ContentBlock, MessagesResponse};
use crate::types::openai::{
    ChatCompletionResponse, Choice, FunctionCall, ResponseMessage, ToolCall, Usage,
};
use uuid::Uuid;

pub fn anthropic_stop_to_openai(reason: Option<&str>) -> &'static str {
    match reason {
        Some("end_turn") | Some("stop_sequence") => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    }
}

pub fn openai_finish_to_anthropic(reason: Option<&str>) -> &'static str {
    match reason {
        Some("stop") => "end_turn",
        Some("length") => "max_tokens",
        Some("tool_calls") | Some("function_call") => "tool_use",
        _ => "end_turn",
    }
}

/// Translate an Anthropic messages body into a chat completion. A body that
/// does not parse yields an empty completion rather than an error.
pub fn anthropic_body_to_openai(body: &[u8], fallback_model: &str) -> ChatCompletionResponse {
    let response = serde_json::from_slice::<MessagesResponse>(body).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Upstream messages body did not parse, returning empty completion");
        MessagesResponse::default()
    });
    anthropic_to_openai_response(response, fallback_model)
}

pub fn anthropic_to_openai_response(
    response: MessagesResponse,
    fallback_model: &str,
) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::Thinking { thinking, .. } => reasoning.push_str(&thinking),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                kind: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            _ => {}
        }
    }

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    let prompt = response.usage.input_tokens;
    let completion = response.usage.output_tokens;

    ChatCompletionResponse {
        id: non_empty_or(response.id, || format!("chatcmpl-{}", Uuid::new_v4().simple())),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: non_empty_or(response.model, || fallback_model.to_string()),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content,
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(anthropic_stop_to_openai(response.stop_reason.as_deref()).to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: Some(prompt + completion),
        }),
    }
}

/// Translate a chat completion body into an Anthropic message. A body that
/// does not parse yields an empty message rather than an error.
pub fn openai_body_to_anthropic(body: &[u8], fallback_model: &str) -> MessagesResponse {
    let response = serde_json::from_slice::<ChatCompletionResponse>(body).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Upstream completion body did not parse, returning empty message");
        ChatCompletionResponse::default()
    });
    openai_to_anthropic_response(response, fallback_model)
}

pub fn openai_to_anthropic_response(
    response: ChatCompletionResponse,
    fallback_model: &str,
) -> MessagesResponse {
    let choice = response.choices.into_iter().next().unwrap_or_default();
    let mut content = Vec::new();

    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        content.push(ContentBlock::Text { text });
    }

    let calls = choice.message.tool_calls.unwrap_or_default();
    let has_tool_calls = !calls.is_empty();
    for call in calls {
        content.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input: parse_arguments(&call.function.arguments),
        });
    }

    let stop_reason = if has_tool_calls {
        "tool_use"
    } else {
        openai_finish_to_anthropic(choice.finish_reason.as_deref())
    };

    let usage = response.usage.unwrap_or_default();

    MessagesResponse {
        id: non_empty_or(response.id, || format!("msg_{}", Uuid::new_v4().simple())),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: non_empty_or(response.model, || fallback_model.to_string()),
        content,
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: anthropic::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

fn non_empty_or(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value
    }
}
