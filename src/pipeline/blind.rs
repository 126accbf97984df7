//! Character-by-character extraction through a boolean oracle.
//!
//! Pipeline flow:
//! Known value → one probe per character → first hit in alphabet order
//! → new known value; a round without a hit ends the extraction.

use super::ExtractionSettings;
use crate::checkpoint::CheckpointManager;
use crate::models::{Alphabet, Probe, Result, RunStats};
use crate::oracle::BooleanOracle;
use crate::pool::Dispatcher;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Blind extraction loop.
pub struct BlindExtractor {
    dispatcher: Dispatcher<dyn BooleanOracle>,
    alphabet: Alphabet,
    prefix: String,
    max_length: Option<usize>,
    checkpoint: Option<CheckpointManager>,
}

impl BlindExtractor {
    pub fn new(oracle: Arc<dyn BooleanOracle>, alphabet: Alphabet, threads: usize) -> Self {
        Self {
            dispatcher: Dispatcher::new(oracle, threads),
            alphabet,
            prefix: String::new(),
            max_length: None,
            checkpoint: None,
        }
    }

    pub fn from_settings(oracle: Arc<dyn BooleanOracle>, settings: &ExtractionSettings) -> Self {
        Self::new(oracle, settings.alphabet.clone(), settings.threads)
            .with_prefix(&settings.prefix)
            .with_max_length(settings.max_length)
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: CheckpointManager) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Candidate values for the next character, in alphabet order.
    pub fn candidates(&self, known: &str) -> Vec<String> {
        let contains = self.dispatcher.oracle().is_contains_attack();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for c in self.alphabet.chars() {
            let mut push = |value: String| {
                if seen.insert(value.clone()) {
                    candidates.push(value);
                }
            };
            push(format!("{known}{c}"));
            if contains {
                push(format!("{c}{known}"));
            }
        }
        candidates
    }

    /// Find the next known value, if any candidate hits.
    pub async fn next_value(&self, known: &str) -> Result<Option<String>> {
        let oracle = Arc::clone(self.dispatcher.oracle());
        let probes = self
            .candidates(known)
            .into_iter()
            .map(|candidate| {
                let payload = oracle.create_payload(&candidate);
                Probe::new(candidate, payload)
            })
            .collect();

        let hit = self
            .dispatcher
            .first_match(probes, |response| oracle.was_success_result(response))
            .await?;
        Ok(hit.map(|result| result.probe.candidate))
    }

    /// Run pre-checks, then extract until a round yields no hit.
    pub async fn run(&mut self) -> Result<RunStats> {
        let start = Instant::now();
        let oracle = Arc::clone(self.dispatcher.oracle());

        oracle.pre_checks().await?;

        info!(
            oracle = oracle.name(),
            prefix = %self.prefix,
            characters = self.alphabet.len(),
            "Starting blind extraction"
        );

        let mut known = self.prefix.clone();
        let mut accepted = 0;
        while !self.max_length.is_some_and(|max| known.chars().count() >= max) {
            match self.next_value(&known).await? {
                Some(hit) => {
                    known = hit;
                    accepted += 1;
                    info!(value = %known, "Dumped value");
                    if let Some(checkpoint) = &mut self.checkpoint {
                        checkpoint.record(&known, None)?;
                    }
                }
                None => break,
            }
        }

        if let Some(checkpoint) = &mut self.checkpoint {
            checkpoint.mark_complete(&known)?;
        }
        info!(value = %known, "Blind extraction complete");

        Ok(RunStats {
            value: known,
            requests_sent: self.dispatcher.probes_sent() as usize,
            characters_accepted: accepted,
            backtracks: 0,
            final_trials: None,
            runtime_secs: start.elapsed().as_secs_f64(),
        })
    }
}
