//! Classification of OpenAI-compatible API errors.

use lectern_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Request timed out upstream.
    Timeout,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) | (403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (408, _) => Self::Timeout,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded | Self::ServerError | Self::Timeout
        )
    }
}

/// Convert an API error into a lectern [`Error`].
///
/// Retryable codes become [`Error::Transient`] so `retry_async` picks them up.
pub fn to_lectern_error(code: OpenAIErrorCode, message: &str) -> Error {
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::RateLimitExceeded => {
            Error::Transient(format!("Rate limit exceeded: {}", message))
        }
        OpenAIErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        OpenAIErrorCode::ContextLengthExceeded => {
            Error::Inference(format!("Context too long: {}", message))
        }
        OpenAIErrorCode::Timeout => Error::Transient(format!("Upstream timeout: {}", message)),
        OpenAIErrorCode::ServerError => Error::Transient(format!("Server error: {}", message)),
        OpenAIErrorCode::Unknown => Error::Inference(message.to_string()),
    }
}
