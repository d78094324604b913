//! Core types shared by the latchless workspace
//!
//! - `error`: the failure taxonomy every structure reports through
//! - `state`: per-collection count/version bookkeeping and the disposal gate

pub mod error;
pub mod state;

pub use error::{LatchlessError, Result};
pub use state::VersionedState;
