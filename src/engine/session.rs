//! Pairwise timing batches against one timing oracle.
//!
//! Every comparison tests exactly two candidate values, each repeated
//! `trials` times with a freshly built payload, so that one batch carries
//! a single effect size.

use super::stats::SignificanceEngine;
use crate::models::{Alphabet, OrmLeakError, Probe, Result, TrialConfig};
use crate::oracle::TimingOracle;
use crate::pool::Dispatcher;
use rand::seq::{IndexedRandom, SliceRandom};
use std::collections::HashSet;
use std::sync::Arc;

/// Attempts at drawing a control distinct from the tested value.
const CONTROL_ATTEMPTS: usize = 64;

/// Result of testing a value against a random control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificanceCheck {
    pub p_value: f64,
    pub significant: bool,
}

/// A timing oracle, its dispatcher and the alphabet under search.
pub struct TimingSession {
    dispatcher: Dispatcher<dyn TimingOracle>,
    alphabet: Alphabet,
    verbose: bool,
}

/// Remove duplicated values, keeping the first occurrence.
pub fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

impl TimingSession {
    pub fn new(oracle: Arc<dyn TimingOracle>, alphabet: Alphabet, threads: usize, verbose: bool) -> Self {
        Self {
            dispatcher: Dispatcher::new(oracle, threads).with_progress(verbose),
            alphabet,
            verbose,
        }
    }

    pub fn oracle(&self) -> &Arc<dyn TimingOracle> {
        self.dispatcher.oracle()
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Probes sent through this session.
    pub fn probes_sent(&self) -> u64 {
        self.dispatcher.probes_sent()
    }

    pub fn engine(&self, config: &TrialConfig) -> SignificanceEngine {
        SignificanceEngine::from_trials(config, self.verbose)
    }

    /// `trials` probes for each of two values.
    pub fn pair_batch(&self, first: &str, second: &str, trials: usize) -> Vec<Probe> {
        let oracle = self.oracle();
        [first, second]
            .iter()
            .flat_map(|value| {
                (0..trials).map(move |_| Probe::new(*value, oracle.create_payload(value)))
            })
            .collect()
    }

    /// Pair up values for a round of comparisons.
    ///
    /// Values are deduplicated and shuffled. With an odd count the last
    /// value is paired with a random other one, so every value is tested.
    pub fn pairwise_batches(&self, values: Vec<String>, trials: usize) -> Vec<Vec<Probe>> {
        let mut values = dedup(values);
        if values.len() < 2 {
            return Vec::new();
        }

        let mut rng = rand::rng();
        values.shuffle(&mut rng);

        let mut batches = Vec::with_capacity(values.len() / 2 + 1);
        if values.len() % 2 == 1 {
            if let Some(last) = values.pop() {
                if let Some(other) = values.choose(&mut rng) {
                    batches.push(self.pair_batch(&last, other, trials));
                }
            }
        }
        for pair in values.chunks(2) {
            if let [first, second] = pair {
                batches.push(self.pair_batch(first, second, trials));
            }
        }
        batches
    }

    /// Batches testing every one-character extension of `known`.
    pub fn round_batches(&self, known: &str, trials: usize) -> Vec<Vec<Probe>> {
        let candidates = self
            .alphabet
            .chars()
            .iter()
            .map(|c| format!("{known}{c}"))
            .collect();
        self.pairwise_batches(candidates, trials)
    }

    /// Fire batches and keep the hit of each comparison.
    pub async fn run_pairs(&self, batches: Vec<Vec<Probe>>, config: &TrialConfig) -> Result<Vec<String>> {
        let engine = self.engine(config);
        let results = self.dispatcher.fire_batches(batches).await?;
        Ok(results
            .iter()
            .filter_map(|batch| engine.evaluate(batch).hit().map(str::to_string))
            .collect())
    }

    /// A random string of the same length as `value` that differs from it.
    pub fn control_for(&self, value: &str) -> Result<String> {
        let len = value.chars().count();
        let mut rng = rand::rng();
        for _ in 0..CONTROL_ATTEMPTS {
            let control = self.alphabet.random_string(len, &mut rng);
            if control != value {
                return Ok(control);
            }
        }
        Err(OrmLeakError::InvalidInput(format!(
            "cannot draw a control distinct from '{value}' with this alphabet"
        )))
    }

    /// Test `value` against a random control of equal length.
    ///
    /// When the control comes out slower the check fails with p = 1.
    pub async fn check_is_significant(&self, value: &str, config: &TrialConfig) -> Result<SignificanceCheck> {
        let control = self.control_for(value)?;
        let batch = self.pair_batch(value, &control, config.trials);
        let results = self.dispatcher.fire_batch(batch).await?;

        let engine = self.engine(config).strict();
        let Some(analysis) = engine.analyse(&results) else {
            return Ok(SignificanceCheck {
                p_value: 1.0,
                significant: false,
            });
        };

        if analysis.hit != value {
            return Ok(SignificanceCheck {
                p_value: 1.0,
                significant: false,
            });
        }

        Ok(SignificanceCheck {
            p_value: analysis.p_value,
            significant: analysis.p_value < engine.significance_level(),
        })
    }
}
