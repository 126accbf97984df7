//! Core data models for ormleak.
//!
//! - Probes and responses flowing through the dispatcher
//! - Extraction state owned by the orchestrators
//! - Configuration and the error taxonomy

mod config;
mod error;
mod probe;
mod state;

pub use config::*;
pub use error::*;
pub use probe::*;
pub use state::*;
