//! Claude to OpenAI request conversion
//!
//! This module converts a Claude Messages request into an OpenAI chat
//! completions request. Lossy spots (unsupported image sources, parameters
//! with no target equivalent, the `any` tool choice) degrade with a warning
//! instead of failing the request.

use super::ConversionError;
use crate::core::constants::{role, tool};
use crate::core::model_manager::ModelManager;
use crate::models::claude::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role, SystemBlock,
    SystemPrompt, ToolChoice, ToolResultContent,
};
use crate::models::openai::{
    ContentPart, ImageUrl, OpenAIChatCompletionRequest, OpenAIContent, OpenAIFunction,
    OpenAIFunctionDef, OpenAIFunctionName, OpenAIMessage, OpenAINamedToolChoice, OpenAITool,
    OpenAIToolCall, OpenAIToolChoice,
};
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Convert Claude API request to OpenAI format
///
/// # Arguments
///
/// * `claude_request` - The Claude API request to convert
/// * `model_manager` - Picks the backend model serving the requested one
/// * `min_tokens` - Lower bound applied to `max_tokens`
/// * `max_tokens` - Upper bound applied to `max_tokens`
///
/// # Errors
///
/// Returns `ConversionError::InvalidRequest` when the request fails local
/// validation. Nothing is sent upstream in that case.
pub fn convert_claude_to_openai(
    claude_request: &MessagesRequest,
    model_manager: &ModelManager,
    min_tokens: u32,
    max_tokens: u32,
) -> Result<OpenAIChatCompletionRequest, ConversionError> {
    validate_request(claude_request)?;

    let openai_model = model_manager.select_model(&claude_request.model);

    let mut openai_messages = Vec::new();
    if let Some(ref system) = claude_request.system {
        if let Some(system_message) = convert_system_prompt(system) {
            openai_messages.push(system_message);
        }
    }
    for message in &claude_request.messages {
        convert_message(message, &mut openai_messages);
    }

    warn_unsupported_parameters(claude_request);

    let clamped_max_tokens = claude_request.max_tokens.max(min_tokens).min(max_tokens);

    let tools = claude_request.tools.as_ref().map(|claude_tools| {
        claude_tools
            .iter()
            .map(|t| OpenAITool {
                tool_type: tool::FUNCTION.to_string(),
                function: OpenAIFunctionDef {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect::<Vec<_>>()
    });

    let openai_request = OpenAIChatCompletionRequest {
        model: openai_model,
        messages: openai_messages,
        max_tokens: Some(clamped_max_tokens),
        temperature: claude_request.temperature,
        top_p: claude_request.top_p,
        stop: claude_request.stop_sequences.clone(),
        stream: claude_request.stream,
        tools: tools.filter(|t| !t.is_empty()),
        tool_choice: claude_request.tool_choice.as_ref().map(convert_tool_choice),
    };

    debug!(
        "Converted Claude request to OpenAI format: model={}, messages={}",
        openai_request.model,
        openai_request.messages.len()
    );
    Ok(openai_request)
}

/// Reject requests the backend could never serve
fn validate_request(request: &MessagesRequest) -> Result<(), ConversionError> {
    if request.model.trim().is_empty() {
        return Err(ConversionError::invalid("model: must not be empty"));
    }
    if request.messages.is_empty() {
        return Err(ConversionError::invalid("messages: at least one message is required"));
    }
    if request.max_tokens == 0 {
        return Err(ConversionError::invalid("max_tokens: must be greater than zero"));
    }

    let mut names = HashSet::new();
    for t in request.tools.iter().flatten() {
        if t.name.trim().is_empty() {
            return Err(ConversionError::invalid("tools: tool name must not be empty"));
        }
        if !names.insert(t.name.as_str()) {
            return Err(ConversionError::invalid(format!(
                "tools: tool names must be unique, '{}' is repeated",
                t.name
            )));
        }
    }

    if let Some(ToolChoice::Named { ref name }) = request.tool_choice {
        if !names.contains(name.as_str()) {
            return Err(ConversionError::invalid(format!(
                "tool_choice: tool '{}' is not defined in tools",
                name
            )));
        }
    }

    Ok(())
}

fn warn_unsupported_parameters(request: &MessagesRequest) {
    if request.top_k.is_some() {
        warn!(parameter = "top_k", "Dropping parameter with no backend equivalent");
    }
    if request.metadata.is_some() {
        warn!(parameter = "metadata", "Dropping parameter with no backend equivalent");
    }
    if request.thinking.is_some() {
        warn!(parameter = "thinking", "Dropping parameter with no backend equivalent");
    }
}

/// Collapse the system prompt into one leading system message
fn convert_system_prompt(system: &SystemPrompt) -> Option<OpenAIMessage> {
    let text = match system {
        SystemPrompt::Text(s) => s.clone(),
        SystemPrompt::Blocks(blocks) => {
            let mut dropped = 0usize;
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    SystemBlock::Text { text } => Some(text.as_str()),
                    SystemBlock::Unsupported => {
                        dropped += 1;
                        None
                    }
                })
                .collect();
            if dropped > 0 {
                warn!(dropped, "Dropping non-text blocks from system prompt");
            }
            texts.join("\n")
        }
    };

    if text.trim().is_empty() {
        return None;
    }
    Some(OpenAIMessage::text(role::SYSTEM, text))
}

/// Convert one Claude message, appending the result(s) to `out`
fn convert_message(message: &Message, out: &mut Vec<OpenAIMessage>) {
    match (&message.content, message.role) {
        (MessageContent::Text(s), Role::User) => out.push(OpenAIMessage::text(role::USER, s.clone())),
        (MessageContent::Text(s), Role::Assistant) => {
            out.push(OpenAIMessage::text(role::ASSISTANT, s.clone()))
        }
        (MessageContent::Blocks(blocks), Role::User) => convert_user_blocks(blocks, out),
        (MessageContent::Blocks(blocks), Role::Assistant) => convert_assistant_blocks(blocks, out),
    }
}

/// Convert a user turn
///
/// Tool results become standalone `tool` messages as soon as they are seen;
/// text and images accumulate into the user message emitted afterwards.
fn convert_user_blocks(blocks: &[ContentBlock], out: &mut Vec<OpenAIMessage>) {
    let mut parts = Vec::new();
    let mut tool_results = 0usize;

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => match source {
                ImageSource::Base64 { media_type, data } => parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{};base64,{}", media_type, data),
                    },
                }),
                ImageSource::Url { .. } | ImageSource::Unsupported => {
                    warn!("Dropping image block: only base64 image sources are forwarded");
                }
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                tool_results += 1;
                out.push(OpenAIMessage {
                    role: role::TOOL.to_string(),
                    content: Some(OpenAIContent::Text(tool_result_to_string(content))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            ContentBlock::ToolUse { name, .. } => {
                warn!(tool = %name, "Dropping tool_use block found in a user message");
            }
            ContentBlock::Unsupported => {
                warn!("Dropping unsupported content block in user message");
            }
        }
    }

    // A turn made only of tool results has nothing left to say as the user
    if parts.is_empty() && tool_results > 0 {
        return;
    }

    let content = match parts.len() {
        0 => OpenAIContent::Text(String::new()),
        1 => match parts.pop() {
            Some(ContentPart::Text { text }) => OpenAIContent::Text(text),
            Some(other) => OpenAIContent::Parts(vec![other]),
            None => OpenAIContent::Text(String::new()),
        },
        _ => OpenAIContent::Parts(parts),
    };

    out.push(OpenAIMessage {
        role: role::USER.to_string(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    });
}

/// Convert an assistant turn
///
/// Text and tool calls never share a message: text goes first in its own
/// message, tool calls follow on a message whose content is null.
fn convert_assistant_blocks(blocks: &[ContentBlock], out: &mut Vec<OpenAIMessage>) {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => texts.push(text.as_str()),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(input).unwrap_or_else(|e| {
                    warn!(tool = %name, "Failed to serialize tool input, sending {{}}: {}", e);
                    "{}".to_string()
                });
                tool_calls.push(OpenAIToolCall {
                    id: id.clone(),
                    call_type: tool::FUNCTION.to_string(),
                    function: OpenAIFunction {
                        name: name.clone(),
                        arguments,
                    },
                });
            }
            ContentBlock::ToolResult { tool_use_id, .. } => {
                warn!(tool_use_id = %tool_use_id, "Dropping tool_result block found in an assistant message");
            }
            ContentBlock::Image { .. } | ContentBlock::Unsupported => {
                warn!("Dropping unsupported content block in assistant message");
            }
        }
    }

    let text = texts.join("\n");
    if !text.is_empty() {
        out.push(OpenAIMessage::text(role::ASSISTANT, text));
    }
    if !tool_calls.is_empty() {
        out.push(OpenAIMessage {
            role: role::ASSISTANT.to_string(),
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        });
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> OpenAIToolChoice {
    match choice {
        ToolChoice::Auto => OpenAIToolChoice::Mode("auto".to_string()),
        ToolChoice::Any => {
            warn!("tool_choice 'any' has no exact backend equivalent, sending 'auto'");
            OpenAIToolChoice::Mode("auto".to_string())
        }
        ToolChoice::None => OpenAIToolChoice::Mode("none".to_string()),
        ToolChoice::Named { name } => OpenAIToolChoice::Function(OpenAINamedToolChoice {
            choice_type: tool::FUNCTION.to_string(),
            function: OpenAIFunctionName { name: name.clone() },
        }),
    }
}

/// Flatten tool result content into the string a `tool` message carries
pub(crate) fn tool_result_to_string(content: &ToolResultContent) -> String {
    match content {
        ToolResultContent::Text(s) => s.clone(),
        ToolResultContent::Items(items) => items
            .iter()
            .map(|item| {
                if item.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        return text.to_string();
                    }
                }
                serde_json::to_string(item).unwrap_or_else(|e| {
                    warn!("Failed to serialize tool result item: {}", e);
                    json!({"error": "unserializable tool result item", "detail": e.to_string()})
                        .to_string()
                })
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> ModelManager {
        ModelManager::new("big-x", "small-y")
    }

    fn request(value: Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    fn convert(value: Value) -> OpenAIChatCompletionRequest {
        convert_claude_to_openai(&request(value), &manager(), 1, 8192).unwrap()
    }

    #[test]
    fn test_selects_big_model_for_opus() {
        let out = convert(json!({
            "model": "claude-3-opus-20240229",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert_eq!(out.model, "big-x");
        assert_eq!(out.messages, vec![OpenAIMessage::text("user", "hi")]);
    }

    #[test]
    fn test_two_text_blocks_stay_multipart() {
        let out = convert(json!({
            "model": "claude-3-haiku",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "Hello"},
                {"type": "text", "text": "World"}
            ]}]
        }));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(
            serde_json::to_value(&out.messages[0]).unwrap(),
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "Hello"},
                    {"type": "text", "text": "World"}
                ]
            })
        );
    }

    #[test]
    fn test_single_text_block_collapses_to_string() {
        let out = convert(json!({
            "model": "claude-3-haiku",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "only"}]}]
        }));
        assert_eq!(out.messages, vec![OpenAIMessage::text("user", "only")]);
    }

    #[test]
    fn test_images() {
        let out = convert(json!({
            "model": "claude-3-haiku",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/cat.png"}}
            ]}]
        }));
        assert_eq!(
            out.messages[0].content,
            Some(OpenAIContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,AAAA".to_string()
                }
            }]))
        );
    }

    #[test]
    fn test_empty_block_list_becomes_empty_string() {
        let out = convert(json!({
            "model": "claude-3-haiku",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": []}]
        }));
        assert_eq!(out.messages, vec![OpenAIMessage::text("user", "")]);
    }

    #[test]
    fn test_system_prompt_blocks() {
        let out = convert(json!({
            "model": "claude-3-haiku",
            "max_tokens": 100,
            "system": [
                {"type": "text", "text": "You are terse."},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AA"}},
                {"type": "text", "text": "Answer in French."}
            ],
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert_eq!(
            out.messages[0],
            OpenAIMessage::text("system", "You are terse.\nAnswer in French.")
        );
    }

    #[test]
    fn test_assistant_text_and_tool_use_split() {
        let out = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "t1", "name": "get_weather", "input": {"city": "Paris"}}
                ]}
            ]
        }));
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[1], OpenAIMessage::text("assistant", "Let me check."));

        let calls_msg = &out.messages[2];
        assert_eq!(calls_msg.role, "assistant");
        assert_eq!(calls_msg.content, None);
        let calls = calls_msg.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);

        for msg in &out.messages {
            if msg.tool_calls.is_some() {
                assert!(msg.content.is_none());
            }
        }
    }

    #[test]
    fn test_assistant_tool_use_only_is_single_message() {
        let out = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "a", "input": {}},
                    {"type": "tool_use", "id": "t2", "name": "b", "input": {"x": 1}}
                ]}
            ]
        }));
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[1].tool_calls.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_assistant_text_blocks_join_with_newline() {
        let out = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "one"},
                    {"type": "text", "text": "two"}
                ]}
            ]
        }));
        assert_eq!(out.messages[1], OpenAIMessage::text("assistant", "one\ntwo"));
    }

    #[test]
    fn test_tool_results_become_tool_messages() {
        let out = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "a", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": [
                        {"type": "text", "text": "line one"},
                        {"type": "json", "value": 3}
                    ]},
                    {"type": "text", "text": "thanks"}
                ]}
            ]
        }));
        assert_eq!(out.messages.len(), 4);
        let tool_msg = &out.messages[2];
        assert_eq!(tool_msg.role, "tool");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("t1"));
        assert_eq!(
            tool_msg.content,
            Some(OpenAIContent::Text(
                "line one\n{\"type\":\"json\",\"value\":3}".to_string()
            ))
        );
        assert_eq!(out.messages[3], OpenAIMessage::text("user", "thanks"));
    }

    #[test]
    fn test_tool_result_only_turn_has_no_user_message() {
        let out = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "42"}
                ]}
            ]
        }));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, "tool");
        assert_eq!(out.messages[0].content, Some(OpenAIContent::Text("42".to_string())));
    }

    #[test]
    fn test_tools_and_tool_choice() {
        let out = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"name": "b_tool", "input_schema": {"type": "object"}},
                {"name": "a_tool", "description": "A", "input_schema": {"type": "object", "properties": {}}}
            ],
            "tool_choice": {"type": "tool", "name": "a_tool"}
        }));
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].function.name, "b_tool");
        assert_eq!(tools[1].function.description.as_deref(), Some("A"));
        assert_eq!(tools[1].function.parameters, json!({"type": "object", "properties": {}}));
        assert_eq!(
            serde_json::to_value(out.tool_choice.unwrap()).unwrap(),
            json!({"type": "function", "function": {"name": "a_tool"}})
        );
    }

    #[test]
    fn test_any_tool_choice_maps_to_auto() {
        let out = convert(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "t", "input_schema": {}}],
            "tool_choice": {"type": "any"}
        }));
        assert_eq!(out.tool_choice, Some(OpenAIToolChoice::Mode("auto".to_string())));
    }

    #[test]
    fn test_parameters_and_clamping() {
        let out = convert_claude_to_openai(
            &request(json!({
                "model": "claude-3-haiku",
                "max_tokens": 100000,
                "temperature": 0.2,
                "top_p": 0.9,
                "top_k": 5,
                "stop_sequences": ["END"],
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            })),
            &manager(),
            100,
            4096,
        )
        .unwrap();
        assert_eq!(out.max_tokens, Some(4096));
        assert_eq!(out.temperature, Some(0.2));
        assert_eq!(out.top_p, Some(0.9));
        assert_eq!(out.stop, Some(vec!["END".to_string()]));
        assert!(out.stream);
    }

    #[test]
    fn test_validation_failures() {
        let no_messages = request(json!({"model": "claude-3-haiku", "max_tokens": 10, "messages": []}));
        assert!(matches!(
            convert_claude_to_openai(&no_messages, &manager(), 1, 100),
            Err(ConversionError::InvalidRequest(_))
        ));

        let duplicate_tools = request(json!({
            "model": "claude-3-haiku",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"name": "dup", "input_schema": {}},
                {"name": "dup", "input_schema": {}}
            ]
        }));
        let err = convert_claude_to_openai(&duplicate_tools, &manager(), 1, 100).unwrap_err();
        assert!(err.to_string().contains("dup"));

        let unknown_choice = request(json!({
            "model": "claude-3-haiku",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "tool_choice": {"type": "tool", "name": "missing"}
        }));
        assert!(convert_claude_to_openai(&unknown_choice, &manager(), 1, 100).is_err());
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let req = request(json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "system": "sys",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "c"},
                    {"type": "tool_use", "id": "t1", "name": "n", "input": {"k": [1, 2]}}
                ]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "ok"}]}
            ]
        }));
        let first = convert_claude_to_openai(&req, &manager(), 1, 100).unwrap();
        let second = convert_claude_to_openai(&req, &manager(), 1, 100).unwrap();
        assert_eq!(first, second);
    }
}
