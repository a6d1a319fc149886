//! Usage: SQLite migration v1->v2 - index snapshots by update time (recovery listing).

use rusqlite::Connection;

use crate::shared::error::AppResult;

pub(super) fn migrate_v1_to_v2(conn: &mut Connection) -> AppResult<()> {
    const VERSION: i64 = 2;
    let tx = conn
        .transaction()
        .map_err(|e| format!("DB_ERROR: failed to start sqlite transaction: {e}"))?;

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_run_snapshots_updated_at ON run_snapshots(updated_at);",
    )
    .map_err(|e| format!("DB_ERROR: failed to create run_snapshots updated_at index: {e}"))?;

    super::record_migration(&tx, VERSION)?;
    super::set_user_version(&tx, VERSION)?;

    tx.commit()
        .map_err(|e| format!("DB_ERROR: failed to commit sqlite transaction: {e}"))?;

    Ok(())
}
