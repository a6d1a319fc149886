//! Usage: JSON-safe snapshot of one run (+ its ordered messages) and rehydration.

use serde::{Deserialize, Serialize};

use super::state::{Message, RootState, Run};
use crate::shared::error::{AppError, AppResult};

pub const SNAPSHOT_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: i64,
    pub run: Run,
    /// Messages in the run's display order.
    pub messages: Vec<Message>,
}

impl Snapshot {
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }
}

/// Extracts `run_id` and normalizes it through a JSON round trip.
/// Returns `Ok(None)` when the run is unknown.
pub fn to_snapshot(state: &RootState, run_id: &str) -> AppResult<Option<Snapshot>> {
    let Some(run) = state.run(run_id) else {
        return Ok(None);
    };

    let raw = Snapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        run: run.clone(),
        messages: state.run_messages(run_id).into_iter().cloned().collect(),
    };

    let value = serde_json::to_value(&raw)?;
    let normalized: Snapshot = serde_json::from_value(value)?;
    Ok(Some(normalized))
}

/// Restores one snapshot into `state`; the stored run and messages replace any in-memory copies.
pub fn rehydrate(mut state: RootState, snapshot: Snapshot) -> AppResult<RootState> {
    if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
        return Err(AppError::new(
            "SNAPSHOT_VERSION",
            format!(
                "snapshot for run {} has schema version {} (supported: {})",
                snapshot.run.run_id, snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION
            ),
        ));
    }

    let run_id = snapshot.run.run_id.clone();
    let order: Vec<String> = snapshot.messages.iter().map(|m| m.id.clone()).collect();
    for message in snapshot.messages {
        state.messages.insert(message.id.clone(), message);
    }
    state.run_messages.insert(run_id.clone(), order);
    state.runs.insert(run_id, snapshot.run);
    Ok(state)
}

pub fn rehydrate_all(
    state: RootState,
    snapshots: impl IntoIterator<Item = Snapshot>,
) -> AppResult<RootState> {
    snapshots.into_iter().try_fold(state, rehydrate)
}
