//! Upstream failure normalization
//!
//! Every failure the gateway surfaces, whether raised by a backend or detected
//! locally, is folded into a [`NormalizedError`] expressed in the client
//! dialect's error vocabulary.

use crate::core::provider::ProviderError;
use crate::models::claude::{ErrorBody, ErrorKind};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

const FALLBACK_MESSAGE: &str = "The upstream service failed to process the request";

impl ErrorKind {
    /// Kind implied by an HTTP status alone
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorKind::InvalidRequest,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Permission,
            404 => ErrorKind::NotFound,
            413 => ErrorKind::RequestTooLarge,
            429 => ErrorKind::RateLimit,
            503 => ErrorKind::Overloaded,
            _ => ErrorKind::ApiError,
        }
    }

    /// HTTP status used when this kind is returned to the client
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            // 529 is the client dialect's "overloaded" status
            ErrorKind::Overloaded => {
                StatusCode::from_u16(529).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
            ErrorKind::ApiError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Raw error payload reported by the vendor behind an aggregating backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawProviderError {
    Parsed(Value),
    /// The payload was a string that did not parse as JSON
    ParseFailed { raw: String, parse_failed: bool },
}

/// Vendor metadata attached to an upstream error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDetails {
    pub provider_name: String,
    pub raw_error: RawProviderError,
}

/// Failure expressed in the client dialect's error vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<ProviderDetails>,
}

impl NormalizedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            FALLBACK_MESSAGE.to_string()
        } else {
            message
        };
        Self {
            kind,
            message,
            provider: None,
        }
    }

    /// Locally detected problem with the inbound request
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn error_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind,
            message: self.message.clone(),
        }
    }

    /// JSON body in the client dialect's error envelope
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "type": self.kind.as_str(),
            "message": self.message,
        });
        if let Some(ref provider) = self.provider {
            error["provider"] = json!(provider);
        }
        json!({
            "type": "error",
            "error": error,
        })
    }
}

impl IntoResponse for NormalizedError {
    fn into_response(self) -> Response {
        (self.kind.status_code(), Json(self.to_json())).into_response()
    }
}

impl From<&ProviderError> for NormalizedError {
    fn from(err: &ProviderError) -> Self {
        map_error(err)
    }
}

/// Map a backend failure onto the client dialect's error taxonomy
///
/// The backend exception subtype wins over the bare status mapping, except
/// for generic server errors where the status is the more specific signal
/// (a 503 becomes `overloaded`).
pub fn map_error(err: &ProviderError) -> NormalizedError {
    let kind = match err {
        ProviderError::Authentication { .. } => ErrorKind::Authentication,
        ProviderError::PermissionDenied { .. } => ErrorKind::Permission,
        ProviderError::NotFound { .. } => ErrorKind::NotFound,
        ProviderError::RateLimit { .. } => ErrorKind::RateLimit,
        ProviderError::BadRequest { .. } => ErrorKind::InvalidRequest,
        ProviderError::Server { status, .. } | ProviderError::ApiError { status, .. } => {
            ErrorKind::from_status(*status)
        }
        ProviderError::Transport(_)
        | ProviderError::MalformedChunk(_)
        | ProviderError::Unexpected(_) => ErrorKind::ApiError,
    };

    let mut normalized = NormalizedError::new(kind, err.to_string());
    normalized.provider = err.body().and_then(extract_provider_details);
    normalized
}

/// Pull `error.metadata.{provider_name, raw}` out of a backend error body
fn extract_provider_details(body: &Value) -> Option<ProviderDetails> {
    let metadata = body
        .pointer("/error/metadata")
        .or_else(|| body.get("metadata"))?;
    let provider_name = metadata.get("provider_name")?.as_str()?.to_string();

    let raw_error = match metadata.get("raw") {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => RawProviderError::Parsed(parsed),
            Err(e) => {
                warn!(provider = %provider_name, "Failed to parse raw provider error: {}", e);
                RawProviderError::ParseFailed {
                    raw: raw.clone(),
                    parse_failed: true,
                }
            }
        },
        Some(other) => RawProviderError::Parsed(other.clone()),
        None => RawProviderError::Parsed(Value::Null),
    };

    Some(ProviderDetails {
        provider_name,
        raw_error,
    })
}
