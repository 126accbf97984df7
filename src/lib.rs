//! ormleak - Blind and time-based ORM leak extraction over HTTP APIs.
//!
//! ## Architecture
//!
//! ormleak guesses an unknown string one character at a time through an
//! oracle:
//! - **Boolean oracles**: the response tells whether a candidate matched
//! - **Timing oracles**: a matching candidate makes the server evaluate a
//!   costly filter, so the request takes measurably longer
//!
//! ## Pipelines
//!
//! - **Blind**: one probe per character → first hit → next character
//! - **Timing**: fit params → pairwise batches → Welch t-test → tournament
//!   → control check → periodic path correction with backtracking
//! - **Strapi**: CVE-2023-22894 account dump built on the blind pipeline
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network uncertainties (statistics, escalation, retries)

pub mod attacks;
pub mod checkpoint;
pub mod client;
pub mod engine;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use checkpoint::{CheckpointManager, DumpCheckpoint};
pub use client::HttpTarget;
pub use models::{Config, OrmLeakError, Result, RunStats, Verdict};
pub use oracle::{BooleanOracle, Oracle, TimingOracle};
pub use pipeline::{BlindExtractor, ExtractionSettings, StrapiCampaign, TimingExtractor};
pub use pool::Dispatcher;
