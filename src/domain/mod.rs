//! Usage: Domain modules (event vocabulary, mapping, state folding, projection, snapshots).

pub mod accumulator;
pub mod events;
pub mod mapper;
pub mod projection;
pub mod reducer;
pub mod request_guard;
pub mod snapshot;
pub mod state;
