//! OpenAI to Claude response conversion
//!
//! This module converts a completed OpenAI chat completion back into a Claude
//! Messages response. The finish reason table here is shared with the
//! streaming translator.

use super::ConversionError;
use crate::core::constants::{finish, id, new_id};
use crate::models::claude::{MessagesResponse, ResponseBlock, StopReason, Usage};
use crate::models::openai::{OpenAIChatCompletionResponse, OpenAIToolCall, OpenAIUsage};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Map an OpenAI finish reason onto a Claude stop reason
///
/// `content_filter` becomes `stop_sequence` for compatibility with existing
/// clients even though no stop sequence matched. Unknown or absent reasons
/// end the turn.
pub fn map_finish_reason(finish_reason: Option<&str>) -> StopReason {
    match finish_reason {
        Some(finish::STOP) => StopReason::EndTurn,
        Some(finish::LENGTH) => StopReason::MaxTokens,
        Some(finish::TOOL_CALLS) | Some(finish::FUNCTION_CALL) => StopReason::ToolUse,
        Some(finish::CONTENT_FILTER) => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Convert OpenAI response to Claude format
///
/// Only the first choice is used. The response echoes `original_model`, the
/// model the client asked for, not the backend model that served it.
///
/// # Arguments
///
/// * `openai_response` - The OpenAI response to convert
/// * `original_model` - The original Claude model name from the request
///
/// # Errors
///
/// Returns `ConversionError::EmptyResponse` if the response has no choices.
pub fn convert_openai_to_claude(
    openai_response: &OpenAIChatCompletionResponse,
    original_model: &str,
) -> Result<MessagesResponse, ConversionError> {
    let choice = openai_response
        .choices
        .first()
        .ok_or(ConversionError::EmptyResponse)?;
    let message = &choice.message;

    let mut response = MessagesResponse::new(new_id(id::MESSAGE), original_model.to_string());

    if let Some(ref content) = message.content {
        let text = content.text();
        if !text.is_empty() {
            response.content.push(ResponseBlock::Text { text });
        }
    }

    for tool_call in message.tool_calls.iter().flatten() {
        response.content.push(convert_tool_call(tool_call));
    }

    // Claude responses always carry at least one content block
    if response.content.is_empty() {
        response.content.push(ResponseBlock::Text {
            text: String::new(),
        });
    }

    response.stop_reason = Some(map_finish_reason(choice.finish_reason.as_deref()));
    response.usage = openai_response
        .usage
        .as_ref()
        .map(convert_usage)
        .unwrap_or_default();

    Ok(response)
}

fn convert_tool_call(tool_call: &OpenAIToolCall) -> ResponseBlock {
    let tool_use_id = if tool_call.id.is_empty() {
        new_id(id::TOOL_USE)
    } else {
        tool_call.id.clone()
    };

    ResponseBlock::ToolUse {
        id: tool_use_id,
        name: tool_call.function.name.clone(),
        input: Value::Object(parse_arguments(
            &tool_call.function.name,
            &tool_call.function.arguments,
        )),
    }
}

/// Parse a tool call's argument string into a JSON object
///
/// Never fails: unparseable text is kept under `error_parsing_arguments` and
/// non-object values are wrapped under `value`.
fn parse_arguments(tool_name: &str, arguments: &str) -> Map<String, Value> {
    if arguments.trim().is_empty() {
        return Map::new();
    }

    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool = %tool_name, "Tool arguments are not a JSON object, wrapping under 'value'");
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
        Err(e) => {
            warn!(tool = %tool_name, "Failed to parse tool arguments: {}", e);
            let mut map = Map::new();
            map.insert("error_parsing_arguments".to_string(), json!(arguments));
            map
        }
    }
}

fn convert_usage(usage: &OpenAIUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens),
    }
}
