//! Usage: Run snapshot repository (idempotent upsert / point lookup / recovery listing).

use rusqlite::{params, Connection, OptionalExtension};

use super::db::Db;
use crate::domain::snapshot::{rehydrate_all, to_snapshot, Snapshot};
use crate::domain::state::RootState;
use crate::shared::blocking;
use crate::shared::error::{db_err, AppError, AppResult};
use crate::shared::time::now_unix_millis;

const DEFAULT_RECOVERY_LIMIT: usize = 500;

/// Upsert keyed by run id. Re-saving an identical payload leaves the row untouched.
pub(crate) fn upsert(conn: &Connection, snapshot: &Snapshot, updated_at: i64) -> AppResult<()> {
    let payload_json = serde_json::to_string(snapshot)?;
    conn.execute(
        r#"
INSERT INTO run_snapshots (run_id, payload_json, schema_version, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(run_id) DO UPDATE SET
  payload_json = excluded.payload_json,
  schema_version = excluded.schema_version,
  updated_at = excluded.updated_at
WHERE run_snapshots.payload_json IS NOT excluded.payload_json
   OR run_snapshots.schema_version IS NOT excluded.schema_version
"#,
        params![
            snapshot.run_id(),
            payload_json,
            snapshot.schema_version,
            updated_at
        ],
    )
    .map_err(|e| db_err!("failed to upsert run snapshot {}: {e}", snapshot.run_id()))?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, run_id: &str) -> AppResult<Option<Snapshot>> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM run_snapshots WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| db_err!("failed to read run snapshot {run_id}: {e}"))?;

    payload
        .map(|raw| decode_payload(run_id, &raw))
        .transpose()
}

/// Most recently updated first. Rows that fail to decode are skipped with a warning.
pub(crate) fn list_recent(conn: &Connection, limit: usize) -> AppResult<Vec<Snapshot>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn
        .prepare(
            "SELECT run_id, payload_json FROM run_snapshots ORDER BY updated_at DESC, run_id ASC LIMIT ?1",
        )
        .map_err(|e| db_err!("failed to prepare run snapshot listing: {e}"))?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| db_err!("failed to list run snapshots: {e}"))?;

    let mut out = Vec::new();
    for row in rows {
        let (run_id, raw) = row.map_err(|e| db_err!("failed to read run snapshot row: {e}"))?;
        match decode_payload(&run_id, &raw) {
            Ok(snapshot) => out.push(snapshot),
            Err(err) => tracing::warn!(run_id = %run_id, "skipping undecodable run snapshot: {err}"),
        }
    }
    Ok(out)
}

pub(crate) fn delete(conn: &Connection, run_id: &str) -> AppResult<bool> {
    let changed = conn
        .execute("DELETE FROM run_snapshots WHERE run_id = ?1", params![run_id])
        .map_err(|e| db_err!("failed to delete run snapshot {run_id}: {e}"))?;
    Ok(changed > 0)
}

fn decode_payload(run_id: &str, raw: &str) -> AppResult<Snapshot> {
    serde_json::from_str(raw).map_err(|e| {
        AppError::with_source(
            "SNAPSHOT_DECODE",
            format!("stored snapshot for run {run_id} is not valid: {e}"),
            e,
        )
    })
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    db: Db,
}

impl SnapshotStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn save(&self, run_id: &str, snapshot: &Snapshot) -> AppResult<()> {
        if snapshot.run_id() != run_id {
            return Err(AppError::new(
                "SNAPSHOT_INVALID",
                format!(
                    "snapshot belongs to run {} but was saved as {run_id}",
                    snapshot.run_id()
                ),
            ));
        }
        let conn = self.db.open_connection()?;
        upsert(&conn, snapshot, now_unix_millis())?;
        tracing::debug!(
            run_id,
            status = snapshot.run.status.as_str(),
            messages = snapshot.messages.len(),
            "run snapshot saved"
        );
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> AppResult<Option<Snapshot>> {
        let conn = self.db.open_connection()?;
        get(&conn, run_id)
    }

    pub fn list_recent(&self, limit: usize) -> AppResult<Vec<Snapshot>> {
        let conn = self.db.open_connection()?;
        list_recent(&conn, limit)
    }

    pub fn delete(&self, run_id: &str) -> AppResult<bool> {
        let conn = self.db.open_connection()?;
        delete(&conn, run_id)
    }

    /// Snapshots the run from `state` and saves it. `Ok(None)` for unknown runs.
    pub fn persist_run(&self, state: &RootState, run_id: &str) -> AppResult<Option<Snapshot>> {
        let Some(snapshot) = to_snapshot(state, run_id)? else {
            return Ok(None);
        };
        self.save(run_id, &snapshot)?;
        Ok(Some(snapshot))
    }

    /// Rebuilds state from the most recent `limit` snapshots (default 500).
    pub fn recover(&self, limit: Option<usize>) -> AppResult<RootState> {
        let snapshots = self.list_recent(limit.unwrap_or(DEFAULT_RECOVERY_LIMIT))?;
        let count = snapshots.len();
        let state = rehydrate_all(RootState::new(), snapshots)?;
        tracing::info!(runs = count, "run snapshots recovered");
        Ok(state)
    }

    pub async fn save_async(&self, snapshot: Snapshot) -> AppResult<()> {
        let store = self.clone();
        blocking::run("snapshot_save", move || {
            store.save(&snapshot.run.run_id, &snapshot)
        })
        .await
    }

    pub async fn get_async(&self, run_id: String) -> AppResult<Option<Snapshot>> {
        let store = self.clone();
        blocking::run("snapshot_get", move || store.get(&run_id)).await
    }
}
