//! Usage: Idempotent ensure patches applied after all versioned migrations.
//!
//! Recreates the snapshot table and its index if they went missing, without
//! touching user_version. Safe to run repeatedly.

use rusqlite::Connection;

use crate::shared::error::AppResult;

pub(super) fn apply_ensure_patches(conn: &mut Connection) -> AppResult<()> {
    ensure_run_snapshots(conn)
}

fn ensure_run_snapshots(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS run_snapshots (
  run_id TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  schema_version INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_run_snapshots_updated_at ON run_snapshots(updated_at);
"#,
    )
    .map_err(|e| format!("DB_ERROR: failed to ensure run_snapshots schema: {e}").into())
}
