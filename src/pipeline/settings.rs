//! Settings shared by the extraction pipelines.

use crate::models::{Alphabet, Config, Result, TrialConfig};
use crate::engine::FitSettings;

/// Plain values an extraction run is constructed with.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub alphabet: Alphabet,
    /// Known prefix to resume from
    pub prefix: String,
    /// Maximum requests in flight
    pub threads: usize,
    /// Stop once the dumped value reaches this many characters
    pub max_length: Option<usize>,
    pub trials: TrialConfig,
    /// Log per-candidate statistics and batch progress
    pub verbose: bool,
    pub do_trials_search: bool,
    pub search_comparisons: usize,
}

impl ExtractionSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            alphabet: Alphabet::new(&config.search.chars)?,
            prefix: config.search.dumped_prefix.clone(),
            threads: config.search.threads,
            max_length: config.search.max_length,
            trials: TrialConfig::from_stats(&config.stats),
            verbose: config.stats.verbose,
            do_trials_search: config.stats.do_trials_search,
            search_comparisons: config.stats.search_comparisons,
        })
    }

    pub fn fit_settings(&self) -> FitSettings {
        FitSettings {
            alphabet: self.alphabet.clone(),
            threads: self.threads,
            do_trials_search: self.do_trials_search,
            search_comparisons: self.search_comparisons,
            verbose: self.verbose,
        }
    }

    /// Whether `known` reached the configured maximum length.
    pub fn reached_max_length(&self, known: &str) -> bool {
        self.max_length
            .is_some_and(|max| known.chars().count() >= max)
    }
}
