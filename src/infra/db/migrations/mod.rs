//! Usage: SQLite schema migrations (user_version + incremental upgrades).
//!
//! `user_version` only ever moves forward. A store written by a newer build
//! (within `MAX_COMPAT_SCHEMA_VERSION`) is left at its version.

mod baseline_v1;
mod ensure;
mod v1_to_v2;

use rusqlite::Connection;

use crate::shared::error::AppResult;

pub(crate) const LATEST_SCHEMA_VERSION: i64 = 2;
const MAX_COMPAT_SCHEMA_VERSION: i64 = 4;

pub(crate) fn apply_migrations(conn: &mut Connection) -> AppResult<()> {
    let mut user_version = read_user_version(conn)?;

    if !(0..=MAX_COMPAT_SCHEMA_VERSION).contains(&user_version) {
        return Err(format!(
            "DB_ERROR: unsupported sqlite schema version: user_version={user_version} (expected 0..={MAX_COMPAT_SCHEMA_VERSION})"
        )
        .into());
    }

    let start_version = user_version;

    if user_version == 0 {
        baseline_v1::create_baseline_v1(conn)?;
        user_version = read_user_version(conn)?;
        tracing::info!(to_version = user_version, "sqlite baseline schema created");
    }

    while user_version < LATEST_SCHEMA_VERSION {
        let from_version = user_version;
        match user_version {
            1 => v1_to_v2::migrate_v1_to_v2(conn)?,
            v => {
                tracing::error!(version = v, "unsupported sqlite schema version during migration");
                return Err(format!(
                    "DB_ERROR: unsupported sqlite schema version: user_version={v}"
                )
                .into());
            }
        }
        user_version = read_user_version(conn)?;
        tracing::info!(
            from_version = from_version,
            to_version = user_version,
            "sqlite migration step completed"
        );
    }

    if start_version < user_version {
        tracing::info!(
            from_version = start_version,
            to_version = user_version,
            "sqlite migrations completed"
        );
    } else if user_version > LATEST_SCHEMA_VERSION {
        tracing::warn!(
            user_version,
            latest = LATEST_SCHEMA_VERSION,
            "sqlite schema is newer than this build; keeping stored version"
        );
    }

    ensure::apply_ensure_patches(conn)?;

    Ok(())
}

pub(crate) fn read_user_version(conn: &Connection) -> AppResult<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| format!("DB_ERROR: failed to read sqlite user_version: {e}").into())
}

/// Sets `user_version` inside `tx`, refusing to move it backwards.
fn set_user_version(tx: &rusqlite::Transaction<'_>, version: i64) -> AppResult<()> {
    let current: i64 = tx
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| format!("DB_ERROR: failed to read sqlite user_version: {e}"))?;
    if version <= current {
        return Ok(());
    }
    tx.pragma_update(None, "user_version", version)
        .map_err(|e| format!("DB_ERROR: failed to update sqlite user_version: {e}"))?;
    Ok(())
}

/// Records a completed step; re-recording the same version is a no-op.
fn record_migration(tx: &rusqlite::Transaction<'_>, version: i64) -> AppResult<()> {
    let now = crate::shared::time::now_unix_seconds();
    tx.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        [version, now],
    )
    .map_err(|e| {
        format!("DB_ERROR: failed to insert schema_migrations row for v{version}: {e}")
    })?;
    Ok(())
}
