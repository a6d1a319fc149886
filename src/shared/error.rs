//! Usage: Unified error model (maps internal failures to `CODE: message` strings).

use std::sync::Arc;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AppError {
    code: String,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Builds a `DB_ERROR` [`AppError`] from format arguments.
macro_rules! db_err {
    ($($arg:tt)*) => {
        $crate::shared::error::AppError::new("DB_ERROR", format!($($arg)*))
    };
}
pub(crate) use db_err;

fn split_code_message(raw: &str) -> Option<(&str, &str)> {
    let msg = raw.trim();
    let msg = msg.strip_prefix("Error:").unwrap_or(msg).trim();
    if msg.is_empty() {
        return None;
    }

    let (maybe_code, rest) = msg.split_once(':')?;
    let code = maybe_code.trim();
    if code.is_empty() {
        return None;
    }
    let mut chars = code.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_') {
        return None;
    }
    Some((code, rest.trim()))
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        if let Some((code, rest)) = split_code_message(&value) {
            let message = if rest.is_empty() { value.trim() } else { rest };
            return AppError::new(code.to_string(), message.to_string());
        }
        AppError::new("INTERNAL_ERROR", value)
    }
}

impl From<&'static str> for AppError {
    fn from(value: &'static str) -> Self {
        AppError::from(value.to_string())
    }
}

impl From<AppError> for String {
    fn from(value: AppError) -> Self {
        value.to_string()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::with_source("SERDE_ERROR", value.to_string(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_string_extracts_leading_code() {
        let err = AppError::from("DB_ERROR: table missing".to_string());
        assert_eq!(err.code(), "DB_ERROR");
        assert_eq!(err.message(), "table missing");
        assert_eq!(err.to_string(), "DB_ERROR: table missing");
    }

    #[test]
    fn from_string_strips_error_prefix() {
        let err = AppError::from("Error: SNAPSHOT_INVALID: bad payload".to_string());
        assert_eq!(err.code(), "SNAPSHOT_INVALID");
        assert_eq!(err.message(), "bad payload");
    }

    #[test]
    fn from_string_without_code_is_internal() {
        let err = AppError::from("something broke: badly".to_string());
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.message(), "something broke: badly");
    }

    #[test]
    fn db_err_macro_formats_message() {
        let table = "run_snapshots";
        let err = db_err!("failed to read {table}");
        assert_eq!(err.to_string(), "DB_ERROR: failed to read run_snapshots");
    }
}
