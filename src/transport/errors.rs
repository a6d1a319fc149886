//! Usage: Pre-stream transport error taxonomy.

use reqwest::header::HeaderMap;

use crate::shared::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request aborted")]
    Aborted,
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("upstream returned HTTP {status} {status_text}")]
    HttpError {
        status: u16,
        status_text: String,
        headers: HeaderMap,
        body: String,
    },
    #[error("network error: {source}")]
    NetworkError {
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl TransportError {
    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::Timeout { .. } => "timeout",
            Self::HttpError { .. } => "http_error",
            Self::NetworkError { .. } => "network_error",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }

    /// Aborted/timeout retry differently from hard failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Aborted | Self::Timeout { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for AppError {
    fn from(value: TransportError) -> Self {
        let code = format!("TRANSPORT_{}", value.code().to_ascii_uppercase());
        AppError::new(code, value.to_string())
    }
}
