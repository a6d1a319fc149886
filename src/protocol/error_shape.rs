//! Usage: Detects the four known terminal-error shapes embedded in a stream frame.
//!
//! Checked in order: top-level `error`, `choices[0].error`, `choices[0].delta.error`,
//! `choices[0].finish_reason == "error"`.

use serde_json::Value;

use crate::domain::events::{ErrorOrigin, StreamErrorInfo};

pub const ERROR_FINISH_REASON: &str = "error";
const FALLBACK_ERROR_MESSAGE: &str = "upstream reported an error mid-stream";

pub fn detect_stream_error(frame: &Value) -> Option<StreamErrorInfo> {
    if let Some(error) = frame.get("error").filter(|v| !v.is_null()) {
        return Some(normalize_error(error, ErrorOrigin::TopLevel));
    }

    let choice = frame
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())?;

    if let Some(error) = choice.get("error").filter(|v| !v.is_null()) {
        return Some(normalize_error(error, ErrorOrigin::Choice));
    }

    if let Some(error) = choice
        .get("delta")
        .and_then(|delta| delta.get("error"))
        .filter(|v| !v.is_null())
    {
        return Some(normalize_error(error, ErrorOrigin::Delta));
    }

    if choice.get("finish_reason").and_then(Value::as_str) == Some(ERROR_FINISH_REASON) {
        return Some(StreamErrorInfo {
            code: None,
            message: FALLBACK_ERROR_MESSAGE.to_string(),
            origin: ErrorOrigin::FinishReason,
            metadata: None,
        });
    }

    None
}

pub fn is_terminal_error_frame(frame: &Value) -> bool {
    detect_stream_error(frame).is_some()
}

fn normalize_error(error: &Value, origin: ErrorOrigin) -> StreamErrorInfo {
    if let Some(message) = error.as_str() {
        return StreamErrorInfo {
            code: None,
            message: non_empty_or_fallback(message),
            origin,
            metadata: None,
        };
    }

    let code = error.get("code").and_then(|code| match code {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(non_empty_or_fallback)
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
    let metadata = error.get("metadata").filter(|v| !v.is_null()).cloned();

    StreamErrorInfo {
        code,
        message,
        origin,
        metadata,
    }
}

fn non_empty_or_fallback(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        FALLBACK_ERROR_MESSAGE.to_string()
    } else {
        trimmed.to_string()
    }
}
