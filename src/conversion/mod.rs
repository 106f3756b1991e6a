//! Conversion between the Claude and OpenAI dialects

pub mod request_converter;
pub mod response_converter;
pub mod stream_converter;

use crate::core::error_mapper::NormalizedError;
use crate::models::claude::ErrorKind;
use thiserror::Error;

/// Failure while converting between dialects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The inbound request can never be served
    #[error("{0}")]
    InvalidRequest(String),

    /// The backend answered with nothing to convert
    #[error("Backend response contained no choices")]
    EmptyResponse,
}

impl ConversionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConversionError::InvalidRequest(message.into())
    }
}

impl From<ConversionError> for NormalizedError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::InvalidRequest(message) => NormalizedError::invalid_request(message),
            ConversionError::EmptyResponse => {
                NormalizedError::new(ErrorKind::ApiError, err.to_string())
            }
        }
    }
}
