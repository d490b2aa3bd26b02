//! Checkpoint module for resumable batch runs.
//!
//! Provides:
//! - `CheckpointState`: completed content and processed keys
//! - `CheckpointStore`: crash-safe persistence, recovery, reconciliation and reset

mod state;
mod store;

pub use state::*;
pub use store::CheckpointStore;
pub(crate) use store::{with_suffix, write_atomically};
