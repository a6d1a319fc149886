//! Usage: Baseline schema at version 1 for fresh stores.

use rusqlite::Connection;

use crate::shared::error::AppResult;

pub(super) fn create_baseline_v1(conn: &mut Connection) -> AppResult<()> {
    const VERSION: i64 = 1;
    let tx = conn
        .transaction()
        .map_err(|e| format!("DB_ERROR: failed to start sqlite transaction: {e}"))?;

    tx.execute_batch(
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
"#,
    )
    .map_err(|e| format!("DB_ERROR: failed to create baseline schema: {e}"))?;

    super::record_migration(&tx, VERSION)?;
    super::set_user_version(&tx, VERSION)?;

    tx.commit()
        .map_err(|e| format!("DB_ERROR: failed to commit sqlite transaction: {e}"))?;

    Ok(())
}
