//! API endpoint handlers
//!
//! This module implements the HTTP endpoints of the gateway: message
//! creation (JSON or SSE), token counting, and health checks. Every failure
//! leaves here in the Claude error envelope.

use crate::conversion::request_converter::{convert_claude_to_openai, tool_result_to_string};
use crate::conversion::response_converter::convert_openai_to_claude;
use crate::conversion::stream_converter::{StreamTranslator, translate_stream};
use crate::core::config::Config;
use crate::core::constants::event;
use crate::core::error_mapper::{NormalizedError, map_error};
use crate::core::model_manager::ModelManager;
use crate::core::provider::Provider;
use crate::core::tokenizer::TokenCounter;
use crate::models::claude::{
    ContentBlock, ErrorKind, MessageContent, MessagesRequest, StreamEvent, SystemBlock,
    SystemPrompt, TokenCountRequest,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::{get, post},
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model_manager: Arc<ModelManager>,
    pub provider: Arc<dyn Provider>,
    pub token_counter: Arc<dyn TokenCounter>,
    /// Cancelled on server shutdown; every stream runs on a child token
    pub shutdown: CancellationToken,
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/v1/messages", post(create_message))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Validate the client's API key from request headers
///
/// Accepts either `x-api-key` or an `Authorization: Bearer` header. Skipped
/// entirely when no client key is configured.
fn validate_api_key(headers: &HeaderMap, config: &Config) -> Result<(), NormalizedError> {
    if config.anthropic_api_key.is_none() {
        return Ok(());
    }

    let client_api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match client_api_key {
        Some(key) if config.validate_client_api_key(key) => Ok(()),
        _ => {
            warn!("Invalid API key provided by client");
            Err(NormalizedError::new(
                ErrorKind::Authentication,
                "Invalid API key. Please provide a valid key via x-api-key or Authorization header.",
            ))
        }
    }
}

/// Parse a JSON request body, reporting failures as `invalid_request_error`
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, NormalizedError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejecting malformed request body: {}", e);
        NormalizedError::invalid_request(format!("Invalid request body: {}", e))
    })
}

/// Render one stream event as an SSE frame
fn to_sse_event(stream_event: &StreamEvent) -> Event {
    match Event::default()
        .event(stream_event.event_name())
        .json_data(stream_event)
    {
        Ok(sse_event) => sse_event,
        Err(e) => {
            error!("Failed to encode stream event: {}", e);
            let fallback =
                NormalizedError::new(ErrorKind::ApiError, "Failed to encode stream event");
            Event::default()
                .event(event::ERROR)
                .data(fallback.to_json().to_string())
        }
    }
}

/// POST /v1/messages - Create a message
async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, NormalizedError> {
    validate_api_key(&headers, &state.config)?;

    let request: MessagesRequest = parse_body(&body)?;
    let original_model = request.model.clone();
    let stream = request.stream;

    info!(
        "Incoming Claude API request: model={}, stream={}, messages={}",
        original_model,
        stream,
        request.messages.len()
    );
    debug!("Full request payload: {:?}", request);

    let openai_request = convert_claude_to_openai(
        &request,
        &state.model_manager,
        state.config.min_tokens_limit,
        state.config.max_tokens_limit,
    )?;

    if stream {
        let fragments = state
            .provider
            .create_chat_completion_stream(openai_request)
            .await
            .map_err(|e| {
                error!(status = ?e.status(), "Provider streaming error: {}", e);
                map_error(&e)
            })?;

        let translator = StreamTranslator::new(original_model, state.token_counter.clone())
            .with_initial_ping(true);
        let events = translate_stream(fragments, translator, state.shutdown.child_token())
            .map(|stream_event| Ok::<_, Infallible>(to_sse_event(&stream_event)));

        let mut response = Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response();
        let response_headers = response.headers_mut();
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        Ok(response)
    } else {
        let provider_response = state
            .provider
            .create_chat_completion(&openai_request)
            .await
            .map_err(|e| {
                error!(status = ?e.status(), "Provider API error: {}", e);
                map_error(&e)
            })?;

        let claude_response = convert_openai_to_claude(&provider_response, &original_model)?;
        Ok(Json(claude_response).into_response())
    }
}

/// Sum token counts over everything the model would read
fn count_request_tokens(request: &TokenCountRequest, counter: &dyn TokenCounter) -> usize {
    let mut total = 0;

    match request.system {
        Some(SystemPrompt::Text(ref s)) => total += counter.count(s),
        Some(SystemPrompt::Blocks(ref blocks)) => {
            for block in blocks {
                if let SystemBlock::Text { text } = block {
                    total += counter.count(text);
                }
            }
        }
        None => {}
    }

    for msg in &request.messages {
        match &msg.content {
            MessageContent::Text(s) => total += counter.count(s),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    total += match block {
                        ContentBlock::Text { text } => counter.count(text),
                        ContentBlock::ToolUse { name, input, .. } => {
                            counter.count(name) + counter.count(&json!(input).to_string())
                        }
                        ContentBlock::ToolResult { content, .. } => {
                            counter.count(&tool_result_to_string(content))
                        }
                        ContentBlock::Image { .. } | ContentBlock::Unsupported => 0,
                    };
                }
            }
        }
    }

    for tool in request.tools.iter().flatten() {
        total += counter.count(&tool.name);
        if let Some(ref description) = tool.description {
            total += counter.count(description);
        }
        total += counter.count(&tool.input_schema.to_string());
    }

    total
}

/// POST /v1/messages/count_tokens - Count tokens in a request
async fn count_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, NormalizedError> {
    validate_api_key(&headers, &state.config)?;

    let request: TokenCountRequest = parse_body(&body)?;
    debug!("Token counting for model: {}", request.model);

    let input_tokens = count_request_tokens(&request, state.token_counter.as_ref()).max(1);
    Ok(Json(json!({ "input_tokens": input_tokens })).into_response())
}

/// GET / - Root endpoint
async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": concat!("Claude dialect gateway v", env!("CARGO_PKG_VERSION")),
        "status": "running",
        "config": {
            "provider": state.provider.provider_name(),
            "base_url": state.config.backend_base_url,
            "max_tokens_limit": state.config.max_tokens_limit,
            "api_key_configured": !state.config.backend_api_key.is_empty(),
            "client_api_key_validation": state.config.anthropic_api_key.is_some(),
            "big_model": state.config.big_model,
            "small_model": state.config.small_model,
        },
        "endpoints": {
            "messages": "/v1/messages",
            "count_tokens": "/v1/messages/count_tokens",
            "health": "/health",
        },
    }))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "provider": state.provider.provider_name(),
        "api_key_valid": state.config.validate_api_key(),
        "client_api_key_validation": state.config.anthropic_api_key.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::{FragmentStream, ProviderError};
    use crate::models::openai::{
        OpenAIChatCompletionRequest, OpenAIChatCompletionResponse, StreamFragment,
    };
    use async_trait::async_trait;
    use axum::http::StatusCode;

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    fn passthrough(detail: &str) -> String {
        detail.to_string()
    }

    /// Backend that replays canned answers
    struct FakeProvider {
        response: serde_json::Value,
        fail_with_status: Option<u16>,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn create_chat_completion(
            &self,
            _request: &OpenAIChatCompletionRequest,
        ) -> Result<OpenAIChatCompletionResponse, ProviderError> {
            if let Some(status) = self.fail_with_status {
                return Err(ProviderError::from_status(status, "upstream said no", passthrough));
            }
            Ok(serde_json::from_value(self.response.clone()).unwrap())
        }

        async fn create_chat_completion_stream(
            &self,
            _request: OpenAIChatCompletionRequest,
        ) -> Result<FragmentStream, ProviderError> {
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(StreamFragment::text("hi")),
                Ok(StreamFragment::finish("stop")),
            ])))
        }

        fn provider_name(&self) -> &str {
            "fake"
        }
    }

    fn config(client_key: Option<&str>) -> Config {
        let key_line = client_key
            .map(|k| format!("anthropic_api_key = \"{}\"", k))
            .unwrap_or_default();
        Config::from_toml_str(&format!(
            r#"
            provider = "openai"
            {}
            [openai]
            api_key = "sk-test"
            [models]
            big_model = "big-x"
            small_model = "small-y"
        "#,
            key_line
        ))
        .unwrap()
    }

    fn state(provider: FakeProvider, client_key: Option<&str>) -> AppState {
        AppState {
            config: Arc::new(config(client_key)),
            model_manager: Arc::new(ModelManager::new("big-x", "small-y")),
            provider: Arc::new(provider),
            token_counter: Arc::new(CharCounter),
            shutdown: CancellationToken::new(),
        }
    }

    fn ok_provider() -> FakeProvider {
        FakeProvider {
            response: json!({
                "id": "chatcmpl-1",
                "choices": [{"message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            }),
            fail_with_status: None,
        }
    }

    fn body(value: serde_json::Value) -> Bytes {
        Bytes::from(value.to_string())
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn simple_request() -> serde_json::Value {
        json!({
            "model": "claude-3-haiku",
            "max_tokens": 50,
            "messages": [{"role": "user", "content": "hi"}]
        })
    }

    #[tokio::test]
    async fn test_non_streaming_message() {
        let response = create_message(
            State(state(ok_provider(), None)),
            HeaderMap::new(),
            body(simple_request()),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let value = json_body(response).await;
        assert_eq!(value["type"], "message");
        assert_eq!(value["model"], "claude-3-haiku");
        assert_eq!(value["content"][0]["text"], "Hello!");
        assert_eq!(value["stop_reason"], "end_turn");
        assert_eq!(value["usage"]["input_tokens"], 5);
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_request() {
        let err = create_message(
            State(state(ok_provider(), None)),
            HeaderMap::new(),
            Bytes::from_static(b"{not json"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = json_body(response).await;
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_validation_happens_before_backend_call() {
        let failing = FakeProvider {
            response: json!({}),
            fail_with_status: Some(500),
        };
        let err = create_message(
            State(state(failing, None)),
            HeaderMap::new(),
            body(json!({"model": "claude-3-haiku", "max_tokens": 50, "messages": []})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_backend_error_is_mapped() {
        let limited = FakeProvider {
            response: json!({}),
            fail_with_status: Some(429),
        };
        let err = create_message(
            State(state(limited, None)),
            HeaderMap::new(),
            body(simple_request()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_client_key_is_enforced() {
        let err = create_message(
            State(state(ok_provider(), Some("secret"))),
            HeaderMap::new(),
            body(simple_request()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        let response = create_message(
            State(state(ok_provider(), Some("secret"))),
            headers,
            body(simple_request()),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_streaming_message_frames() {
        let mut request = simple_request();
        request["stream"] = json!(true);
        let response = create_message(
            State(state(ok_provider(), None)),
            HeaderMap::new(),
            body(request),
        )
        .await
        .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let names: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("event:"))
            .map(str::trim)
            .collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_count_tokens() {
        let response = count_tokens(
            State(state(ok_provider(), None)),
            HeaderMap::new(),
            body(json!({
                "model": "claude-3-haiku",
                "system": "abc",
                "messages": [{"role": "user", "content": [
                    {"type": "text", "text": "hello"},
                    {"type": "tool_result", "tool_use_id": "t", "content": "42"}
                ]}]
            })),
        )
        .await
        .unwrap();
        assert_eq!(json_body(response).await["input_tokens"], 10);
    }
}
