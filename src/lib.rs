//! Streamed chat-generation ingestion.
//!
//! Flow: `transport` opens the request, `protocol` splits the byte stream into
//! frames, `domain::mapper` turns frames into events, `domain::reducer` folds
//! them into `RootState`, and `infra::snapshots` persists terminal runs.

pub mod app;
pub mod domain;
pub mod infra;
pub mod pipeline;
pub mod protocol;
pub mod shared;
pub mod transport;

pub use domain::accumulator::StreamAccumulator;
pub use domain::events::{DomainEvent, ErrorOrigin, MediaRef, MetaFields, StreamErrorInfo};
pub use domain::projection::{project_run, ProjectionOptions, RunView};
pub use domain::reducer::{apply_event, reduce, start_generation, GenerationHandle, StartGeneration};
pub use domain::snapshot::{rehydrate, to_snapshot, Snapshot};
pub use domain::state::{ReasoningVisibility, RootState, RunStatus};
pub use infra::db::Db;
pub use infra::settings::Settings;
pub use infra::snapshots::SnapshotStore;
pub use pipeline::{GenerationError, GenerationRequest, Pipeline, RunOutcome, RunStream};
pub use shared::error::{AppError, AppResult};
pub use transport::{ChatRequest, Transport, TransportError};
