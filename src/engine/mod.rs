//! Timing decision engine.
//!
//! - `stats`: Welch t-test over pairwise batches
//! - `session`: building and firing pairwise batches, control checks
//! - `tournament`: reducing several hits to one winner
//! - `corrector`: re-validating accepted values
//! - `fitter`: DoS magnitude and trial count fitting

pub mod corrector;
pub mod fitter;
pub mod session;
pub mod stats;
pub mod tournament;

pub use corrector::{ChainShape, chain_shape, correct_path};
pub use fitter::{FitSettings, fit_dos_magnitude, fit_params, trials_search};
pub use session::{SignificanceCheck, TimingSession};
pub use stats::{Analysis, CandidateSummary, SignificanceEngine, summarize, welch_p_value};
pub use tournament::{TournamentOutcome, resolve};
