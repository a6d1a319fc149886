//! Usage: Runtime settings (optional TOML file + `CHAT_STREAM_*` environment overrides).

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shared::error::{AppError, AppResult};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 0;
const DEFAULT_LOG_FILE_PREFIX: &str = "chat-stream";
const MAX_REQUEST_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;
const MAX_CONNECT_TIMEOUT_MS: u64 = 5 * 60 * 1000;

const ENV_BASE_URL: &str = "CHAT_STREAM_BASE_URL";
const ENV_REQUEST_TIMEOUT_MS: &str = "CHAT_STREAM_REQUEST_TIMEOUT_MS";
const ENV_CONNECT_TIMEOUT_MS: &str = "CHAT_STREAM_CONNECT_TIMEOUT_MS";
const ENV_LOG_LEVEL: &str = "CHAT_STREAM_LOG_LEVEL";
const ENV_LOG_DIR: &str = "CHAT_STREAM_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub base_url: String,
    /// Overall request timeout; 0 disables it.
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Enables the daily-rolling file layer when set.
    pub dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            dir: None,
            file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transport: TransportSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Reads `path` (if given and present), then applies env overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    pub fn load_with(
        path: Option<&Path>,
        get: impl FnMut(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    AppError::with_source(
                        "SETTINGS_READ",
                        format!("failed to read {}", path.display()),
                        e,
                    )
                })?;
                Self::from_toml_str(&raw)?
            }
            Some(path) => {
                tracing::debug!(path = %path.display(), "settings file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        settings.apply_env_get(get);
        if sanitize(&mut settings) {
            tracing::warn!("settings contained out-of-range values and were clamped");
        }
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        toml::from_str(raw)
            .map_err(|e| AppError::new("SETTINGS_INVALID", format!("invalid settings toml: {e}")))
    }

    pub fn apply_env_get(&mut self, mut get: impl FnMut(&str) -> Option<String>) {
        if let Some(base_url) = get(ENV_BASE_URL).as_deref().and_then(parse_url_trimmed) {
            self.transport.base_url = base_url;
        }
        if let Some(ms) = get(ENV_REQUEST_TIMEOUT_MS)
            .as_deref()
            .and_then(parse_u64_trimmed)
        {
            self.transport.request_timeout_ms = ms;
        }
        if let Some(ms) = get(ENV_CONNECT_TIMEOUT_MS)
            .as_deref()
            .and_then(parse_u64_trimmed)
        {
            self.transport.connect_timeout_ms = ms;
        }
        if let Some(level) = get(ENV_LOG_LEVEL).as_deref().and_then(non_empty_trimmed) {
            self.log.level = level;
        }
        if let Some(dir) = get(ENV_LOG_DIR).as_deref().and_then(non_empty_trimmed) {
            self.log.dir = Some(PathBuf::from(dir));
        }
    }
}

fn sanitize(settings: &mut Settings) -> bool {
    let mut changed = false;
    let transport = &mut settings.transport;

    if transport.base_url.trim().is_empty() {
        transport.base_url = DEFAULT_BASE_URL.to_string();
        changed = true;
    }
    if transport.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
        transport.request_timeout_ms = MAX_REQUEST_TIMEOUT_MS;
        changed = true;
    }
    if transport.connect_timeout_ms == 0 {
        transport.connect_timeout_ms = DEFAULT_CONNECT_TIMEOUT_MS;
        changed = true;
    }
    if transport.connect_timeout_ms > MAX_CONNECT_TIMEOUT_MS {
        transport.connect_timeout_ms = MAX_CONNECT_TIMEOUT_MS;
        changed = true;
    }
    if settings.log.level.trim().is_empty() {
        settings.log.level = DEFAULT_LOG_LEVEL.to_string();
        changed = true;
    }

    changed
}

pub(crate) fn parse_u32_trimmed(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u32>().ok()
}

pub(crate) fn parse_u64_trimmed(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

fn parse_url_trimmed(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(trimmed.trim_end_matches('/').to_string());
    }
    None
}

fn non_empty_trimmed(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
