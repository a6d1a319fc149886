//! Usage: SQLite connection pool setup and schema migrations.

mod migrations;

pub(crate) use migrations::LATEST_SCHEMA_VERSION;

use std::env;
use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::settings::{parse_u32_trimmed, parse_u64_trimmed};
use crate::shared::error::{db_err, AppResult};

const BUSY_TIMEOUT_DEFAULT: Duration = Duration::from_millis(2000);
const POOL_MAX_SIZE_DEFAULT: u32 = 8;
const POOL_MAX_SIZE_LIMIT: u32 = 64;
const POOL_CONNECTION_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);
const PRAGMA_SYNCHRONOUS_DEFAULT: &str = "NORMAL";

#[derive(Debug, Clone)]
struct DbRuntimeConfig {
    busy_timeout: Duration,
    pool_max_size: u32,
    pool_connection_timeout: Duration,
    pragma_synchronous: String,
}

impl DbRuntimeConfig {
    fn from_env() -> Self {
        Self::from_env_get(|key| env::var(key).ok())
    }

    fn from_env_get(mut get: impl FnMut(&str) -> Option<String>) -> Self {
        let busy_timeout = get("CHAT_STREAM_DB_BUSY_TIMEOUT_MS")
            .as_deref()
            .and_then(parse_u64_trimmed)
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(BUSY_TIMEOUT_DEFAULT);

        let pool_max_size = get("CHAT_STREAM_DB_POOL_MAX_SIZE")
            .as_deref()
            .and_then(parse_u32_trimmed)
            .filter(|v| *v > 0)
            .map(|v| v.min(POOL_MAX_SIZE_LIMIT))
            .unwrap_or(POOL_MAX_SIZE_DEFAULT);

        let pragma_synchronous = get("CHAT_STREAM_DB_PRAGMA_SYNCHRONOUS")
            .as_deref()
            .and_then(parse_pragma_synchronous)
            .unwrap_or_else(|| PRAGMA_SYNCHRONOUS_DEFAULT.to_string());

        Self {
            busy_timeout,
            pool_max_size,
            pool_connection_timeout: POOL_CONNECTION_TIMEOUT_DEFAULT,
            pragma_synchronous,
        }
    }
}

fn parse_pragma_synchronous(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_ascii_uppercase();
    match normalized.as_str() {
        "OFF" | "NORMAL" | "FULL" | "EXTRA" => Some(normalized),
        _ => None,
    }
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<SqliteConnectionManager>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

impl Db {
    /// Opens (creating if needed) the store at `path` and applies migrations.
    pub fn open(path: &Path) -> AppResult<Self> {
        let config = DbRuntimeConfig::from_env();
        tracing::info!(
            path = %path.display(),
            busy_timeout_ms = config.busy_timeout.as_millis(),
            pool_max_size = config.pool_max_size,
            pragma_synchronous = %config.pragma_synchronous,
            "sqlite runtime config"
        );

        let manager = SqliteConnectionManager::file(path).with_init({
            let config = config.clone();
            move |conn| {
                conn.busy_timeout(config.busy_timeout)?;
                configure_connection(conn, &config, true)
            }
        });
        Self::build(manager, config.pool_max_size, &config, &path.display().to_string())
    }

    /// Single-connection in-memory store (every pooled connection would otherwise be a separate database).
    pub fn open_in_memory() -> AppResult<Self> {
        let config = DbRuntimeConfig::from_env_get(|_| None);
        let manager = SqliteConnectionManager::memory().with_init({
            let config = config.clone();
            move |conn| configure_connection(conn, &config, false)
        });
        Self::build(manager, 1, &config, ":memory:")
    }

    fn build(
        manager: SqliteConnectionManager,
        max_size: u32,
        config: &DbRuntimeConfig,
        path_hint: &str,
    ) -> AppResult<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(config.pool_connection_timeout)
            .build(manager)
            .map_err(|e| db_err!("failed to create db pool: {e}"))?;
        let mut conn = pool
            .get()
            .map_err(|e| db_err!("failed to get startup connection: {e}"))?;

        migrations::apply_migrations(&mut conn)
            .map_err(|e| db_err!("sqlite migration failed at {path_hint}: {}", e.message()))?;

        Ok(Self { pool })
    }

    pub(crate) fn open_connection(
        &self,
    ) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| db_err!("failed to get connection from pool: {e}"))
    }

    /// Re-runs migrations on demand; safe to call any number of times.
    pub fn migrate(&self) -> AppResult<()> {
        let mut conn = self.open_connection()?;
        migrations::apply_migrations(&mut conn)
    }

    pub fn schema_version(&self) -> AppResult<i64> {
        let conn = self.open_connection()?;
        migrations::read_user_version(&conn)
    }
}

fn configure_connection(
    conn: &Connection,
    config: &DbRuntimeConfig,
    wal: bool,
) -> rusqlite::Result<()> {
    let journal_mode = if wal { "WAL" } else { "MEMORY" };
    let sql = format!(
        r#"
PRAGMA journal_mode = {journal_mode};
PRAGMA foreign_keys = ON;
PRAGMA synchronous = {synchronous};
PRAGMA temp_store = MEMORY;
"#,
        synchronous = config.pragma_synchronous.as_str(),
    );
    conn.execute_batch(&sql)
}
