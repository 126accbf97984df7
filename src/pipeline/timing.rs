//! Time-based extraction driven by a state machine.
//!
//! Pipeline flow:
//! Fit params → [round of pairwise batches → tournament → control check
//! → accept] → path correction every time more than one value is pending
//! → ... → done when a round keeps failing after every retry.
//!
//! Epistemic foundation:
//! - K_i: TrialConfig and DumpState are mutated only here, between batches
//! - B_i: A round may yield no winner → escalate trials and retry
//! - I^B: Network noise → every accepted value is re-validated later

use super::ExtractionSettings;
use crate::checkpoint::CheckpointManager;
use crate::engine::{TimingSession, correct_path, fit_params, resolve};
use crate::models::{DumpState, OrmLeakError, Result, RunStats, TrialConfig};
use crate::oracle::TimingOracle;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// States of a time-based extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started
    Idle,
    /// Looking for the next character
    Searching,
    /// Re-validating the accepted values
    Validating,
    /// Extraction complete
    Done,
    /// Unrecoverable error
    Failed,
}

/// Time-based extraction orchestrator.
pub struct TimingExtractor {
    session: TimingSession,
    settings: ExtractionSettings,
    config: TrialConfig,
    dump: DumpState,
    phase: Phase,
    checkpoint: Option<CheckpointManager>,
    characters_accepted: usize,
    backtracks: usize,
}

impl TimingExtractor {
    pub fn new(oracle: Arc<dyn TimingOracle>, settings: ExtractionSettings) -> Result<Self> {
        if settings.alphabet.len() < 2 {
            return Err(OrmLeakError::InvalidInput(
                "time-based extraction compares characters pairwise: use at least two characters"
                    .to_string(),
            ));
        }

        Ok(Self {
            session: TimingSession::new(
                oracle,
                settings.alphabet.clone(),
                settings.threads,
                settings.verbose,
            ),
            config: settings.trials.clone(),
            dump: DumpState::new(settings.prefix.clone()),
            settings,
            phase: Phase::Idle,
            checkpoint: None,
            characters_accepted: 0,
            backtracks: 0,
        })
    }

    pub fn with_checkpoint(mut self, checkpoint: CheckpointManager) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Value dumped so far (the partial value after a failure).
    pub fn known(&self) -> &str {
        self.dump.known()
    }

    /// Current statistical tuning.
    pub fn trial_config(&self) -> &TrialConfig {
        &self.config
    }

    /// Probes sent through the extraction session.
    pub fn probes_sent(&self) -> u64 {
        self.session.probes_sent()
    }

    /// Run the extraction to completion.
    ///
    /// On error the phase is `Failed` and `known()` holds the partial value.
    pub async fn run(&mut self) -> Result<RunStats> {
        let start = Instant::now();
        info!(
            oracle = self.session.oracle().name(),
            prefix = %self.dump.prefix(),
            trials = self.config.trials,
            significance_level = self.config.significance_level,
            "Starting time-based extraction"
        );

        if let Err(e) = self.drive().await {
            self.phase = Phase::Failed;
            error!(error = %e, known_value = %self.dump.known(), "Extraction failed");
            if let Some(checkpoint) = &mut self.checkpoint {
                checkpoint.record(self.dump.known(), Some(self.config.trials))?;
            }
            return Err(e);
        }

        if let Some(checkpoint) = &mut self.checkpoint {
            checkpoint.mark_complete(self.dump.known())?;
        }
        info!(
            value = %self.dump.known(),
            trials = self.config.trials,
            backtracks = self.backtracks,
            "Time-based extraction complete"
        );

        Ok(RunStats {
            value: self.dump.known().to_string(),
            requests_sent: self.session.probes_sent() as usize,
            characters_accepted: self.characters_accepted,
            backtracks: self.backtracks,
            final_trials: Some(self.config.trials),
            runtime_secs: start.elapsed().as_secs_f64(),
        })
    }

    async fn drive(&mut self) -> Result<()> {
        fit_params(
            self.session.oracle(),
            &self.settings.fit_settings(),
            &mut self.config,
        )
        .await?;

        self.phase = Phase::Searching;
        let mut retries = 0;

        loop {
            match self.phase {
                Phase::Searching => {
                    if self.settings.reached_max_length(self.dump.known()) {
                        info!(max_length = ?self.settings.max_length, "Reached maximum length");
                        self.phase = Phase::Done;
                        continue;
                    }

                    let Some(hit) = self.search_round().await? else {
                        if retries < self.config.retries {
                            match self.config.escalate() {
                                Ok(trials) => {
                                    retries += 1;
                                    warn!(trials = trials, retry = retries, "Failed to determine next character, repeating");
                                    continue;
                                }
                                // an empty round at the trial ceiling ends the value
                                Err(e) => debug!(error = %e, "No trials left to repeat the round"),
                            }
                        }
                        info!(
                            retries = self.config.retries,
                            "No character found after every retry: value complete or target not vulnerable"
                        );
                        self.phase = Phase::Done;
                        continue;
                    };

                    let check = self.session.check_is_significant(&hit, &self.config).await?;
                    if !check.significant {
                        let trials = self.config.escalate()?;
                        warn!(candidate = %hit, p_value = check.p_value, trials = trials, "Winner failed its control check, repeating");
                        continue;
                    }

                    retries = 0;
                    self.dump.accept(hit);
                    self.characters_accepted += 1;
                    info!(value = %self.dump.known(), "Dumped value");
                    if let Some(checkpoint) = &mut self.checkpoint {
                        checkpoint.record(self.dump.known(), Some(self.config.trials))?;
                    }

                    if self.dump.needs_validation() {
                        self.phase = Phase::Validating;
                    }
                }
                Phase::Validating => {
                    debug!("Attempting to identify and correct any mistakes");
                    let chain = self.dump.validation_chain();
                    let corrected = correct_path(&self.session, &chain, &mut self.config).await?;
                    if let Some(known) = self.dump.finish_validation(corrected) {
                        self.backtracks += 1;
                        warn!(value = %known, "Detected an error in dumped values, backtracked");
                        if let Some(checkpoint) = &mut self.checkpoint {
                            checkpoint.record_backtrack(&known, Some(self.config.trials))?;
                        }
                    }
                    self.phase = Phase::Searching;
                }
                Phase::Done => return Ok(()),
                Phase::Idle | Phase::Failed => {
                    return Err(OrmLeakError::Internal(format!(
                        "extraction loop entered in phase {:?}",
                        self.phase
                    )));
                }
            }
        }
    }

    /// One round over the alphabet, reduced to at most one winner.
    async fn search_round(&self) -> Result<Option<String>> {
        let batches = self
            .session
            .round_batches(self.dump.known(), self.config.trials);
        let hits = self.session.run_pairs(batches, &self.config).await?;
        debug!(hits = ?hits, "Round complete");

        let outcome = resolve(&self.session, hits, &self.config).await?;
        if outcome.rounds > 0 {
            debug!(rounds = outcome.rounds, winner = ?outcome.winner, "Tournament resolved");
        }
        Ok(outcome.winner)
    }
}
