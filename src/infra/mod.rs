//! Usage: Infrastructure adapters (SQLite store, snapshot repository, settings).

pub mod db;
pub mod settings;
pub mod snapshots;
