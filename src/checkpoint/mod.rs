//! Checkpoint module for resumable extractions.
//!
//! Provides:
//! - `DumpCheckpoint`: The dumped value, trial count and timestamps
//! - `CheckpointManager`: Persistence and loading of checkpoint state

mod state;

pub use state::*;
