pub(crate) mod blocking;
pub mod error;
pub(crate) mod time;
