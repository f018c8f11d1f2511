//! Request translation between the OpenAI chat and Anthropic messages
//! dialects.

use crate::types::anthropic::{
    self, ContentBlock, ImageSource, Message, MessagesRequest, ToolResultContent,
};
use crate::types::openai::{
    self, ChatCompletionRequest, ChatMessage, ContentPart, FunctionCall, FunctionDefinition,
    NamedFunction, NamedToolChoice, StopSequences, ToolCall,
};
use serde_json::{json, Map, Value};

/// Build an Anthropic messages request from an OpenAI chat request.
///
/// System and developer turns are merged into the top-level `system`
/// field, tool results become user `tool_result` blocks and consecutive
/// turns of the same role are folded together since the messages API
/// requires alternation.
pub fn openai_to_anthropic(
    req: ChatCompletionRequest,
    model: &str,
    default_max_tokens: u32,
) -> MessagesRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for msg in req.messages {
        match msg.role.as_str() {
            "system" | "developer" => {
                let text = msg.text_content();
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            "assistant" => {
                let text = msg.text_content();
                let calls = msg.tool_calls.unwrap_or_default();
                if calls.is_empty() {
                    if text.is_empty() {
                        continue;
                    }
                    push_merged(&mut messages, "assistant", anthropic::MessageContent::Text(text));
                    continue;
                }

                let mut blocks = Vec::with_capacity(calls.len() + 1);
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text });
                }
                for call in calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: parse_arguments(&call.function.arguments),
                    });
                }
                push_merged(&mut messages, "assistant", anthropic::MessageContent::Blocks(blocks));
            }
            "tool" | "function" => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: Some(ToolResultContent::Text(msg.text_content())),
                    is_error: None,
                };
                push_merged(&mut messages, "user", anthropic::MessageContent::Blocks(vec![block]));
            }
            _ => {
                let content = match msg.content {
                    Some(openai::MessageContent::Text(text)) => anthropic::MessageContent::Text(text),
                    Some(openai::MessageContent::Parts(parts)) => {
                        anthropic::MessageContent::Blocks(parts.into_iter().filter_map(part_to_block).collect())
                    }
                    None => anthropic::MessageContent::Text(String::new()),
                };
                push_merged(&mut messages, "user", content);
            }
        }
    }

    let (tools, tool_choice) = match req.tool_choice {
        Some(openai::ToolChoice::Mode(mode)) if mode == "none" => (None, None),
        choice => (
            req.tools.map(|tools| tools.into_iter().map(tool_to_anthropic).collect()),
            choice.and_then(tool_choice_to_anthropic),
        ),
    };

    let mut extra = Map::new();
    if let Some(user) = req.extra.get("user").and_then(Value::as_str) {
        extra.insert("metadata".to_string(), json!({ "user_id": user }));
    }

    MessagesRequest {
        model: model.to_string(),
        messages,
        system: (!system_parts.is_empty())
            .then(|| anthropic::SystemPrompt::Text(system_parts.join("\n"))),
        max_tokens: Some(
            req.max_tokens
                .or(req.max_completion_tokens)
                .unwrap_or(default_max_tokens),
        ),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: req.stop.map(StopSequences::into_vec),
        stream: req.stream,
        tools,
        tool_choice,
        extra,
    }
}

/// Build an OpenAI chat request from an Anthropic messages request.
///
/// Tool results are emitted as `tool` messages ahead of any remaining user
/// content from the same turn. Thinking and unrecognised blocks are dropped.
pub fn anthropic_to_openai(req: MessagesRequest, model: &str) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        let text = system.joined_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for msg in req.messages {
        let blocks = msg.content.into_blocks();

        if msg.role == "assistant" {
            let mut text = String::new();
            let mut calls = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(&t),
                    ContentBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                        id,
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name,
                            arguments: serde_json::to_string(&input)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    }),
                    _ => {}
                }
            }
            if text.is_empty() && calls.is_empty() {
                continue;
            }
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
                tool_calls: (!calls.is_empty()).then_some(calls),
                ..Default::default()
            });
            continue;
        }

        let mut parts: Vec<ContentPart> = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(openai::MessageContent::Text(
                        content.map(|c| c.joined_text()).unwrap_or_default(),
                    )),
                    tool_call_id: Some(tool_use_id),
                    ..Default::default()
                }),
                ContentBlock::Text { text } => parts.push(ContentPart::text(text)),
                ContentBlock::Image { source } => match source {
                    ImageSource::Base64 { media_type, data } => {
                        parts.push(ContentPart::image(format!("data:{};base64,{}", media_type, data)))
                    }
                    ImageSource::Url { url } => parts.push(ContentPart::image(url)),
                    ImageSource::Other => {}
                },
                _ => {}
            }
        }

        if parts.is_empty() {
            continue;
        }
        let content = if parts.iter().all(|p| p.kind == "text") {
            openai::MessageContent::Text(
                parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        } else {
            openai::MessageContent::Parts(parts)
        };
        messages.push(ChatMessage {
            role: msg.role,
            content: Some(content),
            ..Default::default()
        });
    }

    let tool_choice = req.tool_choice.map(|choice| match choice {
        anthropic::ToolChoice::Auto => openai::ToolChoice::Mode("auto".to_string()),
        anthropic::ToolChoice::Any => openai::ToolChoice::Mode("required".to_string()),
        anthropic::ToolChoice::None => openai::ToolChoice::Mode("none".to_string()),
        anthropic::ToolChoice::Tool { name } => openai::ToolChoice::Named(NamedToolChoice {
            kind: "function".to_string(),
            function: NamedFunction { name },
        }),
    });

    let mut extra = Map::new();
    if let Some(user) = req
        .extra
        .get("metadata")
        .and_then(|m| m.get("user_id"))
        .and_then(Value::as_str)
    {
        extra.insert("user".to_string(), Value::String(user.to_string()));
    }

    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        max_completion_tokens: None,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.map(StopSequences::Many),
        stream: req.stream,
        stream_options: None,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| openai::Tool {
                    kind: "function".to_string(),
                    function: FunctionDefinition {
                        name: tool.name,
                        description: tool.description,
                        parameters: Some(tool.input_schema),
                    },
                })
                .collect()
        }),
        tool_choice,
        reasoning_effort: None,
        extra,
    }
}

/// Tool-call arguments are a JSON string on the OpenAI side; anything that
/// does not decode to an object becomes `{}`.
pub fn parse_arguments(arguments: &str) -> Value {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}))
}

fn push_merged(messages: &mut Vec<Message>, role: &str, content: anthropic::MessageContent) {
    if let Some(last) = messages.last_mut() {
        if last.role == role {
            let previous = std::mem::replace(
                &mut last.content,
                anthropic::MessageContent::Blocks(Vec::new()),
            );
            let mut blocks = previous.into_blocks();
            blocks.extend(content.into_blocks());
            last.content = anthropic::MessageContent::Blocks(blocks);
            return;
        }
    }
    messages.push(Message {
        role: role.to_string(),
        content,
    });
}

fn part_to_block(part: ContentPart) -> Option<ContentBlock> {
    match part.kind.as_str() {
        "text" => part.text.map(|text| ContentBlock::Text { text }),
        "image_url" => part.image_url.map(|image| ContentBlock::Image {
            source: image_source(&image.url),
        }),
        _ => None,
    }
}

fn image_source(url: &str) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return ImageSource::Base64 {
                media_type: media_type.to_string(),
                data: data.to_string(),
            };
        }
    }
    ImageSource::Url {
        url: url.to_string(),
    }
}

fn tool_to_anthropic(tool: openai::Tool) -> anthropic::Tool {
    anthropic::Tool {
        name: tool.function.name,
        description: tool.function.description,
        input_schema: tool
            .function
            .parameters
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    }
}

fn tool_choice_to_anthropic(choice: openai::ToolChoice) -> Option<anthropic::ToolChoice> {
    match choice {
        openai::ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(anthropic::ToolChoice::Auto),
            "required" => Some(anthropic::ToolChoice::Any),
            _ => None,
        },
        openai::ToolChoice::Named(named) => Some(anthropic::ToolChoice::Tool {
            name: named.function.name,
        }),
        openai::ToolChoice::Other(_) => None,
    }
}
