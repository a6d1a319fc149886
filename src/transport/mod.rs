//! Usage: Chat-completions transport (one streaming POST, pre-stream failure classification).
//!
//! Decoding only ever starts on a successful status line: non-2xx bodies are
//! read in full and returned as `TransportError::HttpError` first.

mod cancel;
mod errors;

pub use cancel::{CancelScope, ABORT_REASON_CANCELLED, ABORT_REASON_TIMEOUT};
pub use errors::TransportError;

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::request_guard::validate_request_body;
use crate::infra::settings::TransportSettings;
use crate::shared::error::{AppError, AppResult};

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Checked in this order; first non-empty value wins.
// TODO: confirm the priority against the provider's published response-header contract.
pub const GENERATION_ID_HEADERS: [&str; 4] = [
    "x-generation-id",
    "x-openrouter-generation-id",
    "openrouter-generation-id",
    "generation-id",
];

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub api_key: String,
    /// Built elsewhere; only the boundary flags are checked here.
    pub body: Value,
    pub cancel: Option<CancellationToken>,
    /// Overrides the configured request timeout; `Some(Duration::ZERO)` disables it.
    pub timeout: Option<Duration>,
    pub request_id: Option<String>,
    pub base_url: Option<String>,
}

pub struct StreamResponse {
    pub bytes: ByteStream,
    pub headers: HeaderMap,
    pub request_id: String,
    pub generation_id: Option<String>,
    /// Stays armed for the whole stream; the decode loop checks it at every frame.
    pub cancel: CancelScope,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("headers", &self.headers)
            .field("request_id", &self.request_id)
            .field("generation_id", &self.generation_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl Transport {
    pub fn new(settings: &TransportSettings) -> AppResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent(format!(
            "chat-stream-core/{}",
            env!("CARGO_PKG_VERSION")
        ));
        if settings.connect_timeout_ms > 0 {
            builder = builder.connect_timeout(Duration::from_millis(settings.connect_timeout_ms));
        }
        let client = builder
            .build()
            .map_err(|e| AppError::new("HTTP_CLIENT_INIT", e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            request_timeout: (settings.request_timeout_ms > 0)
                .then(|| Duration::from_millis(settings.request_timeout_ms)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send(&self, request: ChatRequest) -> Result<StreamResponse, TransportError> {
        let request_id = request
            .request_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("req_{}", Uuid::new_v4()));

        if request
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            tracing::debug!(request_id = %request_id, "request cancelled before send");
            return Err(TransportError::Aborted);
        }

        validate_request_body(&request.body).map_err(|violation| {
            TransportError::InvalidRequest {
                reason: violation.to_string(),
            }
        })?;
        let body = serde_json::to_vec(&request.body).map_err(|e| TransportError::InvalidRequest {
            reason: e.to_string(),
        })?;

        let base_url = request.base_url.as_deref().unwrap_or(&self.base_url);
        let url = chat_completions_url(base_url);
        let timeout = request.timeout.or(self.request_timeout);
        let scope = CancelScope::new(request.cancel.as_ref(), timeout);

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(request.api_key.trim())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .body(body);
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            builder = builder.header(REQUEST_ID_HEADER, value);
        }

        tracing::debug!(request_id = %request_id, url = %url, "sending chat completion request");

        let sent = tokio::select! {
            biased;
            _ = scope.token().cancelled() => None,
            result = builder.send() => Some(result),
        };
        let response = match sent {
            None => return Err(log_failure(&request_id, scope.cancellation_error())),
            Some(Err(err)) if scope.is_cancelled() => {
                tracing::debug!(request_id = %request_id, error = %err, "send failed after cancellation");
                return Err(log_failure(&request_id, scope.cancellation_error()));
            }
            Some(Err(source)) => {
                return Err(log_failure(
                    &request_id,
                    TransportError::NetworkError { source },
                ))
            }
            Some(Ok(response)) => response,
        };

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let read = tokio::select! {
                biased;
                _ = scope.token().cancelled() => None,
                text = response.text() => Some(text),
            };
            let body = match read {
                None => return Err(log_failure(&request_id, scope.cancellation_error())),
                Some(Ok(body)) => body,
                Some(Err(err)) => {
                    tracing::warn!(request_id = %request_id, error = %err, "failed to read error body");
                    String::new()
                }
            };
            return Err(log_failure(
                &request_id,
                TransportError::HttpError {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or_default().to_string(),
                    headers,
                    body,
                },
            ));
        }

        let generation_id = generation_id_from_headers(&headers);
        tracing::debug!(
            request_id = %request_id,
            status = status.as_u16(),
            generation_id = generation_id.as_deref(),
            "chat completion stream opened"
        );

        Ok(StreamResponse {
            bytes: Box::pin(response.bytes_stream()),
            headers,
            request_id,
            generation_id,
            cancel: scope,
        })
    }
}

fn log_failure(request_id: &str, err: TransportError) -> TransportError {
    tracing::warn!(
        request_id,
        code = err.code(),
        status = err.status(),
        "chat completion request failed: {err}"
    );
    err
}

pub fn chat_completions_url(base_url: &str) -> String {
    format!("{}/{}", base_url.trim().trim_end_matches('/'), CHAT_COMPLETIONS_PATH)
}

/// Best-effort generation id from response headers.
pub fn generation_id_from_headers(headers: &HeaderMap) -> Option<String> {
    GENERATION_ID_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}
