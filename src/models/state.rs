//! Extraction state owned by the orchestrators.
//!
//! Worker tasks never touch these types: they are mutated only between
//! batches, by the single task driving the extraction.

use super::{OrmLeakError, Result, StatsConfig};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Deduplicated, sorted set of characters tried at each position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    chars: Vec<char>,
}

impl Alphabet {
    pub fn new(chars: &str) -> Result<Self> {
        let mut chars: Vec<char> = chars.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        if chars.is_empty() {
            return Err(OrmLeakError::InvalidInput("alphabet is empty".to_string()));
        }
        Ok(Self { chars })
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// A random string of `len` characters drawn from the alphabet.
    pub fn random_string<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> String {
        (0..len)
            .filter_map(|_| self.chars.choose(rng))
            .collect()
    }
}

/// Mutable statistical tuning of a time-based run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialConfig {
    /// Trials per candidate in every pairwise batch
    pub trials: usize,
    pub significance_level: f64,
    pub max_trials: usize,
    pub trials_multiplier: f64,
    /// Retry budget for empty rounds and path correction
    pub retries: usize,
    /// Skip hypothesis testing, always accept the slowest candidate
    pub use_highest_mean: bool,
}

impl TrialConfig {
    pub fn from_stats(stats: &StatsConfig) -> Self {
        Self {
            trials: stats.trials,
            significance_level: stats.significance_level,
            max_trials: stats.max_trials,
            trials_multiplier: stats.trials_multiplier,
            retries: stats.retries,
            use_highest_mean: stats.use_highest_mean,
        }
    }

    /// Multiply the trial count after a detected error.
    ///
    /// Fails once the count would exceed `max_trials`.
    pub fn escalate(&mut self) -> Result<usize> {
        let next = ((self.trials as f64) * self.trials_multiplier).ceil() as usize;
        let next = next.max(self.trials + 1);
        if next > self.max_trials {
            return Err(OrmLeakError::CouldNotFitParameters(format!(
                "trials would reach {next}, above max_trials {}: increase max_trials",
                self.max_trials
            )));
        }
        self.trials = next;
        Ok(next)
    }

    /// Drop the trial count by 25% once results are far past the threshold.
    pub fn relax(&mut self) -> usize {
        self.trials = (((self.trials as f64) * 0.75).ceil() as usize).max(1);
        self.trials
    }
}

/// Outcome of a significance decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The candidate was measurably slower than its opponent
    Hit { candidate: String, p_value: f64 },
    /// No statistically significant difference
    NoDecision { p_value: f64 },
}

impl Verdict {
    /// The winning candidate, if any.
    pub fn hit(&self) -> Option<&str> {
        match self {
            Self::Hit { candidate, .. } => Some(candidate),
            Self::NoDecision { .. } => None,
        }
    }

    pub fn p_value(&self) -> f64 {
        match self {
            Self::Hit { p_value, .. } | Self::NoDecision { p_value } => *p_value,
        }
    }
}

/// The dumped value and the accepted values awaiting validation.
#[derive(Debug, Clone)]
pub struct DumpState {
    /// Value the run started from; backtracking never goes below it
    prefix: String,
    known: String,
    /// Values accepted since the last path correction
    pending: Vec<String>,
}

impl DumpState {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            known: prefix.clone(),
            prefix,
            pending: Vec::new(),
        }
    }

    pub fn known(&self) -> &str {
        &self.known
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Record a confirmed hit.
    pub fn accept(&mut self, hit: String) {
        if !self.known.is_empty() {
            self.pending.push(std::mem::take(&mut self.known));
        }
        self.known = hit;
    }

    /// Whether enough values accumulated to run a path correction.
    pub fn needs_validation(&self) -> bool {
        self.pending.len() > 1
    }

    /// The chain of accepted values, oldest first, ending with the known value.
    pub fn validation_chain(&self) -> Vec<String> {
        let mut chain = self.pending.clone();
        chain.push(self.known.clone());
        chain
    }

    /// Apply the corrected chain; returns the new known value on backtrack.
    pub fn finish_validation(&mut self, corrected: Vec<String>) -> Option<String> {
        let expected = self.pending.len() + 1;
        self.pending.clear();
        if corrected.len() == expected {
            return None;
        }
        self.known = corrected
            .last()
            .cloned()
            .unwrap_or_else(|| self.prefix.clone());
        Some(self.known.clone())
    }
}

/// Statistics for a finished extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Final dumped value
    pub value: String,
    /// Requests sent to the target
    pub requests_sent: usize,
    /// Characters accepted (including ones later backtracked)
    pub characters_accepted: usize,
    /// Number of backtracks after path correction
    pub backtracks: usize,
    /// Trial count when the run ended (time-based runs)
    pub final_trials: Option<usize>,
    /// Wall-clock runtime in seconds
    pub runtime_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial_config() -> TrialConfig {
        TrialConfig {
            trials: 10,
            significance_level: 0.1,
            max_trials: 30,
            trials_multiplier: 1.5,
            retries: 2,
            use_highest_mean: false,
        }
    }

    #[test]
    fn test_alphabet_sorted_and_deduplicated() {
        let alphabet = Alphabet::new("cabbac").unwrap();
        assert_eq!(alphabet.chars(), &['a', 'b', 'c']);
        assert!(Alphabet::new("").is_err());
    }

    #[test]
    fn test_random_string_uses_alphabet() {
        let alphabet = Alphabet::new("xy").unwrap();
        let s = alphabet.random_string(16, &mut rand::rng());
        assert_eq!(s.chars().count(), 16);
        assert!(s.chars().all(|c| c == 'x' || c == 'y'));
    }

    #[test]
    fn test_escalate_until_max_trials() {
        let mut config = trial_config();
        assert_eq!(config.escalate().unwrap(), 15);
        assert_eq!(config.escalate().unwrap(), 23);
        let err = config.escalate().unwrap_err();
        assert!(matches!(err, OrmLeakError::CouldNotFitParameters(_)));
        assert_eq!(config.trials, 23);
    }

    #[test]
    fn test_escalate_always_grows() {
        let mut config = trial_config();
        config.trials = 1;
        config.trials_multiplier = 1.01;
        assert_eq!(config.escalate().unwrap(), 2);
    }

    #[test]
    fn test_relax_drops_a_quarter() {
        let mut config = trial_config();
        assert_eq!(config.relax(), 8);
        config.trials = 1;
        assert_eq!(config.relax(), 1);
    }

    #[test]
    fn test_dump_state_validation_cycle() {
        let mut state = DumpState::new("");
        state.accept("a".into());
        assert!(!state.needs_validation());
        state.accept("ab".into());
        assert!(!state.needs_validation());
        state.accept("abc".into());
        assert!(state.needs_validation());
        assert_eq!(state.validation_chain(), vec!["a", "ab", "abc"]);

        assert_eq!(state.finish_validation(vec!["a".into(), "ab".into()]), Some("ab".into()));
        assert_eq!(state.known(), "ab");
        assert!(!state.needs_validation());
    }

    #[test]
    fn test_dump_state_backtracks_to_prefix() {
        let mut state = DumpState::new("x");
        state.accept("xa".into());
        state.accept("xab".into());
        assert!(state.needs_validation());
        assert_eq!(state.finish_validation(Vec::new()), Some("x".into()));
        assert_eq!(state.known(), "x");
    }
}
