//! Provider abstraction layer for backends speaking the chat completions dialect
//!
//! This module defines the common trait implemented by every backend, the
//! error type they raise, and the SSE decoding shared by their streaming paths.

use crate::models::openai::{
    OpenAIChatCompletionRequest, OpenAIChatCompletionResponse, OpenAIStreamingChunk,
    StreamFragment,
};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tracing::debug;

/// Errors raised by a backend call
///
/// Status-carrying variants keep the HTTP status and the error body (parsed
/// as JSON when possible) so the error mapper can extract provider metadata.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String, body: Option<Value> },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String, body: Option<Value> },

    #[error("Not found: {message}")]
    NotFound { message: String, body: Option<Value> },

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String, body: Option<Value> },

    #[error("Bad request: {message}")]
    BadRequest {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    #[error("Server error (status {status}): {message}")]
    Server {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    #[error("API error (status {status}): {message}")]
    ApiError {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed stream chunk: {0}")]
    MalformedChunk(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ProviderError {
    /// Build the error for a non-success backend response
    ///
    /// `classify` turns the raw error text into a friendlier message.
    pub fn from_status(status: u16, error_text: &str, classify: fn(&str) -> String) -> Self {
        let body = serde_json::from_str::<Value>(error_text).ok();
        let detail = body
            .as_ref()
            .and_then(|b| b.pointer("/error/message"))
            .and_then(Value::as_str)
            .unwrap_or(error_text);
        let mut message = classify(detail);
        if message.trim().is_empty() {
            message = format!("Backend returned status {}", status);
        }

        match status {
            400 | 422 => ProviderError::BadRequest {
                status,
                message,
                body,
            },
            401 => ProviderError::Authentication { message, body },
            403 => ProviderError::PermissionDenied { message, body },
            404 => ProviderError::NotFound { message, body },
            429 => ProviderError::RateLimit { message, body },
            500..=599 => ProviderError::Server {
                status,
                message,
                body,
            },
            _ => ProviderError::ApiError {
                status,
                message,
                body,
            },
        }
    }

    /// Build the error for an error object delivered inside a 200 body
    ///
    /// The object's numeric `code` stands in for the status when it is one;
    /// otherwise the failure counts as a bad gateway.
    pub fn in_band(error: Value) -> Self {
        let status = error
            .get("code")
            .and_then(|code| {
                code.as_u64()
                    .or_else(|| code.as_str().and_then(|s| s.parse().ok()))
            })
            .and_then(|code| u16::try_from(code).ok())
            .filter(|code| (400..=599).contains(code))
            .unwrap_or(502);
        let text = serde_json::json!({ "error": error }).to_string();
        ProviderError::from_status(status, &text, verbatim)
    }

    /// HTTP status reported by the backend, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Authentication { .. } => Some(401),
            ProviderError::PermissionDenied { .. } => Some(403),
            ProviderError::NotFound { .. } => Some(404),
            ProviderError::RateLimit { .. } => Some(429),
            ProviderError::BadRequest { status, .. }
            | ProviderError::Server { status, .. }
            | ProviderError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured error body returned by the backend, if any
    pub fn body(&self) -> Option<&Value> {
        match self {
            ProviderError::Authentication { body, .. }
            | ProviderError::PermissionDenied { body, .. }
            | ProviderError::NotFound { body, .. }
            | ProviderError::RateLimit { body, .. }
            | ProviderError::BadRequest { body, .. }
            | ProviderError::Server { body, .. }
            | ProviderError::ApiError { body, .. } => body.as_ref(),
            _ => None,
        }
    }
}

fn verbatim(detail: &str) -> String {
    detail.to_string()
}

/// Fail a completion whose body carries an `error` object instead of choices
pub(crate) fn reject_in_band_error(
    completion: OpenAIChatCompletionResponse,
) -> Result<OpenAIChatCompletionResponse, ProviderError> {
    match completion.error {
        Some(error) => Err(ProviderError::in_band(error)),
        None => Ok(completion),
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Transport(format!("request timed out: {}", err))
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Live sequence of fragments from a streaming backend call
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, ProviderError>> + Send>>;

/// Trait for LLM API providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send non-streaming chat completion request
    async fn create_chat_completion(
        &self,
        request: &OpenAIChatCompletionRequest,
    ) -> Result<OpenAIChatCompletionResponse, ProviderError>;

    /// Send streaming chat completion request
    async fn create_chat_completion_stream(
        &self,
        request: OpenAIChatCompletionRequest,
    ) -> Result<FragmentStream, ProviderError>;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// Supported provider types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderType {
    OpenAI,
    OpenRouter,
}

impl ProviderType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(ProviderType::OpenAI),
            "openrouter" => Some(ProviderType::OpenRouter),
            _ => None,
        }
    }
}

/// Outcome of decoding one SSE line
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Fragment(StreamFragment),
    Skip,
    Done,
}

/// Decode one line of a chat completions SSE body
pub(crate) fn decode_sse_line(line: &str) -> Result<SseLine, ProviderError> {
    let trimmed = line.trim();
    let Some(data) = trimmed.strip_prefix("data:") else {
        // blank separators, comments and `event:` lines
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let mut chunk: OpenAIStreamingChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::MalformedChunk(format!("{}: {}", e, data)))?;
    if let Some(error) = chunk.error.take() {
        return Err(ProviderError::in_band(error));
    }
    Ok(SseLine::Fragment(StreamFragment::from(chunk)))
}

/// Turn a streaming HTTP response into a fragment stream
///
/// The stream ends at `[DONE]` or when the body is exhausted. Dropping it
/// drops the underlying connection.
pub(crate) fn fragment_stream(response: reqwest::Response) -> FragmentStream {
    let byte_stream = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let reader = tokio_util::io::StreamReader::new(byte_stream);
    let lines = LinesStream::new(tokio::io::BufReader::new(reader).lines());

    let stream = async_stream::stream! {
        tokio::pin!(lines);
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    yield Err(ProviderError::Transport(e.to_string()));
                    return;
                }
            };
            match decode_sse_line(&line) {
                Ok(SseLine::Fragment(fragment)) => yield Ok(fragment),
                Ok(SseLine::Skip) => continue,
                Ok(SseLine::Done) => {
                    debug!("Upstream stream finished with [DONE]");
                    return;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn passthrough(detail: &str) -> String {
        detail.to_string()
    }

    #[test]
    fn test_from_status_picks_subtype() {
        assert!(matches!(
            ProviderError::from_status(429, "slow down", passthrough),
            ProviderError::RateLimit { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(403, "nope", passthrough),
            ProviderError::PermissionDenied { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(503, "busy", passthrough),
            ProviderError::Server { status: 503, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(413, "too big", passthrough),
            ProviderError::ApiError { status: 413, .. }
        ));
    }

    #[test]
    fn test_from_status_keeps_json_body() {
        let text = json!({"error": {"message": "bad key", "code": 401}}).to_string();
        let err = ProviderError::from_status(401, &text, passthrough);
        assert_eq!(err.to_string(), "Authentication failed: bad key");
        assert_eq!(err.body().unwrap()["error"]["code"], 401);
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_from_status_never_has_empty_message() {
        let err = ProviderError::from_status(500, "", passthrough);
        assert_eq!(err.to_string(), "Server error (status 500): Backend returned status 500");
    }

    #[test]
    fn test_decode_sse_lines() {
        assert_eq!(decode_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(decode_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(decode_sse_line("data: [DONE]").unwrap(), SseLine::Done);

        let line = r#"data: {"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        assert_eq!(
            decode_sse_line(line).unwrap(),
            SseLine::Fragment(StreamFragment::text("Hi"))
        );

        assert!(matches!(
            decode_sse_line("data: {not json"),
            Err(ProviderError::MalformedChunk(_))
        ));
    }

    #[test]
    fn test_decode_in_band_error_chunk() {
        let line = json!({
            "error": {"code": 502, "message": "Provider returned error"},
            "choices": [{"delta": {"content": ""}, "finish_reason": "error"}]
        });
        let err = decode_sse_line(&format!("data: {}", line)).unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert_eq!(
            err.to_string(),
            "Server error (status 502): Provider returned error"
        );
        assert_eq!(err.body().unwrap()["error"]["code"], 502);
    }

    #[test]
    fn test_in_band_error_status() {
        let rate_limited = ProviderError::in_band(json!({"code": "429", "message": "slow down"}));
        assert!(matches!(rate_limited, ProviderError::RateLimit { .. }));

        let no_code = ProviderError::in_band(json!({"message": "boom"}));
        assert_eq!(no_code.status(), Some(502));

        let odd_code = ProviderError::in_band(json!({"code": "context_length_exceeded"}));
        assert_eq!(odd_code.status(), Some(502));
        assert_eq!(
            odd_code.to_string(),
            r#"Server error (status 502): {"error":{"code":"context_length_exceeded"}}"#
        );
    }

    #[test]
    fn test_reject_in_band_error_response() {
        let completion: OpenAIChatCompletionResponse = serde_json::from_value(json!({
            "error": {
                "code": 429,
                "message": "Upstream rate limited",
                "metadata": {"provider_name": "Anthropic", "raw": "{\"type\":\"rate_limit\"}"}
            }
        }))
        .unwrap();
        let err = reject_in_band_error(completion).unwrap_err();
        assert_eq!(err.to_string(), "Rate limit exceeded: Upstream rate limited");
        assert_eq!(
            err.body().unwrap()["error"]["metadata"]["provider_name"],
            "Anthropic"
        );

        let ok: OpenAIChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}}]
        }))
        .unwrap();
        assert_eq!(reject_in_band_error(ok).unwrap().choices.len(), 1);
    }
}
