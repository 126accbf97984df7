//! Oracle contracts implemented by every concrete attack.
//!
//! Epistemic foundation:
//! - K_i: The engine only builds payloads and reads responses through these traits
//! - K_i: All HTTP I/O happens inside `send_request`
//! - B_i: A request may fail → `Result<ProbeResponse>`; the dispatcher turns
//!   failures into rejected responses instead of aborting a batch
//! - I^R: Boolean and timing capabilities are selected per attack variant

use crate::models::{Payload, ProbeResponse, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Capability shared by every attack: shape a payload, send it.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Build the request testing whether `candidate` extends the known value.
    fn create_payload(&self, candidate: &str) -> Payload;

    /// Send a payload to the target, exactly once.
    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse>;
}

/// An oracle whose responses directly reveal a hit.
#[async_trait]
pub trait BooleanOracle: Oracle {
    /// Whether the response indicates that the candidate matched.
    fn was_success_result(&self, response: &ProbeResponse) -> bool;

    /// Also probe `c + known` (the filter uses a contains operation).
    fn is_contains_attack(&self) -> bool {
        false
    }

    /// Checks run before exploitation; `NotVulnerable` stops the run.
    async fn pre_checks(&self) -> Result<()> {
        Ok(())
    }
}

/// How the DoS magnitude is searched for a given target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosSearch {
    /// Increase by `step` until a rejection, then back off by `backoff`.
    Linear {
        step: usize,
        backoff: usize,
        max: usize,
    },
    /// Step up while accepted; on rejection step back and halve the step.
    Halving { initial_step: usize, max: usize },
}

/// A column with a known value, used to fit the trial count.
#[derive(Clone)]
pub struct Calibration {
    /// Oracle leaking the calibration column instead of the target column
    pub oracle: Arc<dyn TimingOracle>,
    /// Value known to be a prefix of the calibration column
    pub hit_value: String,
}

impl std::fmt::Debug for Calibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calibration")
            .field("oracle", &self.oracle.name())
            .field("hit_value", &self.hit_value)
            .finish()
    }
}

/// An oracle revealing a hit through slower processing.
///
/// `create_payload` of a timing oracle is expected to be
/// `add_orm_leak_payload(build_dos_payload(), candidate)`.
pub trait TimingOracle: Oracle {
    /// Build a payload whose evaluation cost scales with the DoS magnitude.
    fn build_dos_payload(&self) -> Payload;

    /// Splice the condition testing `candidate` into a DoS payload.
    ///
    /// A matching candidate must make the server evaluate the DoS construct.
    fn add_orm_leak_payload(&self, dos: Payload, candidate: &str) -> Payload;

    /// Current size of the cost-inducing construct.
    fn dos_magnitude(&self) -> usize;

    fn set_dos_magnitude(&self, magnitude: usize);

    /// Search strategy for the DoS magnitude on this target.
    fn dos_search(&self) -> DosSearch;

    /// Payload sent while searching the DoS magnitude.
    fn fit_probe(&self) -> Payload {
        self.build_dos_payload()
    }

    /// Oracle and known value for the trial-count search, if configured.
    fn calibration(&self) -> Option<Calibration> {
        None
    }
}
