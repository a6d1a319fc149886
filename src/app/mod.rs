//! Usage: Process-level bootstrap.

pub mod logging;
