//! Significance testing over timed probe results.
//!
//! Results are grouped by candidate value. The slowest group is the hit
//! candidate; every other result is pooled into the miss group, and a
//! one-sided Welch t-test asks whether the hit mean is greater.

use crate::models::{ProbeResult, TrialConfig, Verdict};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::{Data, Median, Statistics};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Summary statistics of the timings of one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    pub candidate: String,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation, undefined below two samples
    pub std: Option<f64>,
    pub size: usize,
}

impl CandidateSummary {
    fn from_times(candidate: &str, times: &[f64]) -> Self {
        let size = times.len();
        if size == 0 {
            return Self {
                candidate: candidate.to_string(),
                mean: 0.0,
                median: 0.0,
                std: None,
                size,
            };
        }
        Self {
            candidate: candidate.to_string(),
            mean: times.mean(),
            median: Data::new(times.to_vec()).median(),
            // sample std is undefined (NaN) below two samples
            std: (size >= 2).then(|| times.std_dev()),
            size,
        }
    }
}

/// Group results by candidate value, in candidate order.
pub fn summarize(results: &[ProbeResult]) -> Vec<CandidateSummary> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for result in results {
        groups.entry(result.candidate()).or_default().push(result.secs());
    }
    groups
        .iter()
        .map(|(candidate, times)| CandidateSummary::from_times(candidate, times))
        .collect()
}

/// One-sided Welch t-test p-value for "hit mean is greater than miss mean".
pub fn welch_p_value(hit: &CandidateSummary, miss: &CandidateSummary) -> f64 {
    let (Some(s1), Some(s2)) = (hit.std, miss.std) else {
        return 1.0;
    };
    let v1 = s1 * s1 / hit.size as f64;
    let v2 = s2 * s2 / miss.size as f64;
    let diff = hit.mean - miss.mean;
    let se = (v1 + v2).sqrt();

    if se == 0.0 {
        return if diff > 0.0 { 0.0 } else { 1.0 };
    }

    let t = diff / se;
    let df = (v1 + v2).powi(2)
        / (v1 * v1 / (hit.size - 1) as f64 + v2 * v2 / (miss.size - 1) as f64);

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (1.0 - dist.cdf(t)).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Full outcome of analysing one batch.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Per-candidate statistics, in candidate order
    pub summaries: Vec<CandidateSummary>,
    /// Candidate with the highest mean
    pub hit: String,
    /// Candidate with the lowest mean
    pub miss: String,
    pub p_value: f64,
    /// False when the highest mean was accepted without a test
    pub tested: bool,
}

/// Decides hits at a significance level.
#[derive(Debug, Clone, Copy)]
pub struct SignificanceEngine {
    significance_level: f64,
    use_highest_mean: bool,
    verbose: bool,
}

impl SignificanceEngine {
    pub fn new(significance_level: f64, use_highest_mean: bool, verbose: bool) -> Self {
        Self {
            significance_level,
            use_highest_mean,
            verbose,
        }
    }

    pub fn from_trials(config: &TrialConfig, verbose: bool) -> Self {
        Self::new(config.significance_level, config.use_highest_mean, verbose)
    }

    /// Always run the test when the sample allows it.
    pub fn strict(mut self) -> Self {
        self.use_highest_mean = false;
        self
    }

    /// Compute summaries and the p-value of the slowest candidate.
    ///
    /// Returns `None` for an empty batch.
    pub fn analyse(&self, results: &[ProbeResult]) -> Option<Analysis> {
        let summaries = summarize(results);

        let mut hit = summaries.first()?;
        let mut miss = hit;
        for summary in &summaries[1..] {
            if summary.mean > hit.mean {
                hit = summary;
            }
            if summary.mean < miss.mean {
                miss = summary;
            }
        }
        let (hit_name, miss_name) = (hit.candidate.clone(), miss.candidate.clone());

        if summaries.len() == 1 {
            return Some(Analysis {
                hit: hit_name,
                miss: miss_name,
                p_value: 1.0,
                tested: false,
                summaries,
            });
        }

        let misses: Vec<f64> = results
            .iter()
            .filter(|r| r.candidate() != hit_name)
            .map(ProbeResult::secs)
            .collect();
        let pooled = CandidateSummary::from_times("miss", &misses);

        let (p_value, tested) = if self.use_highest_mean || hit.std.is_none() || pooled.std.is_none() {
            (0.0, false)
        } else {
            (welch_p_value(hit, &pooled), true)
        };

        let analysis = Analysis {
            hit: hit_name,
            miss: miss_name,
            p_value,
            tested,
            summaries,
        };
        self.log(&analysis);
        Some(analysis)
    }

    /// Decide whether a batch has a hit.
    pub fn evaluate(&self, results: &[ProbeResult]) -> Verdict {
        match self.analyse(results) {
            Some(analysis) if analysis.p_value < self.significance_level => Verdict::Hit {
                candidate: analysis.hit,
                p_value: analysis.p_value,
            },
            Some(analysis) => Verdict::NoDecision {
                p_value: analysis.p_value,
            },
            None => Verdict::NoDecision { p_value: 1.0 },
        }
    }

    pub fn significance_level(&self) -> f64 {
        self.significance_level
    }

    fn log(&self, analysis: &Analysis) {
        if !self.verbose {
            debug!(hit = %analysis.hit, miss = %analysis.miss, p_value = analysis.p_value, "Batch analysed");
            return;
        }
        info!(hit = %analysis.hit, miss = %analysis.miss, "Stats analysis");
        for s in &analysis.summaries {
            info!(
                candidate = %s.candidate,
                mean = s.mean,
                median = s.median,
                std = ?s.std,
                size = s.size,
                "  timings"
            );
        }
        if analysis.tested {
            info!(candidate = %analysis.hit, p_value = analysis.p_value, "  p-value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, Probe, ProbeResponse};
    use std::time::Duration;

    fn result(candidate: &str, secs: f64) -> ProbeResult {
        ProbeResult {
            probe: Probe::new(candidate, Payload::Query(String::new())),
            response: ProbeResponse::new(200, ""),
            elapsed: Duration::from_secs_f64(secs),
        }
    }

    /// Ten samples with the given mean and a spread of about `std`.
    fn samples(candidate: &str, mean: f64, std: f64) -> Vec<ProbeResult> {
        let offsets = [-1.5, -1.0, -0.5, -0.25, 0.0, 0.0, 0.25, 0.5, 1.0, 1.5];
        offsets
            .iter()
            .map(|o| result(candidate, mean + o * std))
            .collect()
    }

    fn engine() -> SignificanceEngine {
        SignificanceEngine::new(0.1, false, false)
    }

    #[test]
    fn test_summary_statistics() {
        let results = vec![result("a", 1.0), result("a", 3.0), result("a", 2.0), result("b", 5.0)];
        let summaries = summarize(&results);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].candidate, "a");
        assert!((summaries[0].mean - 2.0).abs() < 1e-9);
        assert!((summaries[0].median - 2.0).abs() < 1e-9);
        assert!((summaries[0].std.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(summaries[0].size, 3);
        assert_eq!(summaries[1].std, None);
    }

    #[test]
    fn test_summary_of_even_group() {
        let results: Vec<ProbeResult> = [1.0, 10.0, 2.0, 3.0]
            .iter()
            .map(|t| result("a", *t))
            .collect();
        let summary = &summarize(&results)[0];

        assert!((summary.mean - 4.0).abs() < 1e-9);
        assert!((summary.median - 2.5).abs() < 1e-9);
        assert!((summary.std.unwrap() - 4.0825).abs() < 1e-3);
        assert_eq!(summary.size, 4);
    }

    #[test]
    fn test_clear_separation_is_a_hit() {
        let mut results = samples("x", 1.2, 0.05);
        results.extend(samples("y", 0.3, 0.04));

        let analysis = engine().analyse(&results).unwrap();
        assert_eq!(analysis.hit, "x");
        assert!(analysis.tested);
        assert!(analysis.p_value < 0.001);
        assert_eq!(
            engine().evaluate(&results).hit(),
            Some("x")
        );
    }

    #[test]
    fn test_overlapping_timings_are_no_decision() {
        let mut results = samples("x", 0.31, 0.05);
        results.extend(samples("y", 0.30, 0.05));

        let verdict = engine().evaluate(&results);
        assert!(verdict.hit().is_none());
        assert!(verdict.p_value() > 0.1);
    }

    #[test]
    fn test_single_trial_falls_back_to_highest_mean() {
        let results = vec![result("x", 0.9), result("y", 0.2)];
        let analysis = engine().analyse(&results).unwrap();

        assert!(!analysis.tested);
        assert_eq!(analysis.p_value, 0.0);
        assert_eq!(engine().evaluate(&results).hit(), Some("x"));
    }

    #[test]
    fn test_use_highest_mean_skips_test() {
        let mut results = samples("x", 0.31, 0.05);
        results.extend(samples("y", 0.30, 0.05));
        let engine = SignificanceEngine::new(0.1, true, false);

        assert_eq!(engine.evaluate(&results).hit(), Some("x"));
        assert!(engine.strict().evaluate(&results).hit().is_none());
    }

    #[test]
    fn test_single_group_never_decides() {
        let results = samples("x", 1.0, 0.1);
        let verdict = engine().evaluate(&results);
        assert_eq!(verdict, Verdict::NoDecision { p_value: 1.0 });
    }

    #[test]
    fn test_identical_inputs_identical_decisions() {
        let mut results = samples("b", 0.5, 0.1);
        results.extend(samples("a", 0.45, 0.1));

        let first = engine().analyse(&results).unwrap();
        let second = engine().analyse(&results).unwrap();
        assert_eq!(first.summaries, second.summaries);
        assert_eq!(first.p_value, second.p_value);
        assert_eq!(engine().evaluate(&results), engine().evaluate(&results));

        // completion order does not change the grouping
        let mut reversed = results.clone();
        reversed.reverse();
        let third = engine().analyse(&reversed).unwrap();
        assert_eq!(third.hit, first.hit);
        assert!((third.p_value - first.p_value).abs() < 1e-9);
    }

    #[test]
    fn test_zero_variance() {
        let hit = CandidateSummary {
            candidate: "x".into(),
            mean: 1.0,
            median: 1.0,
            std: Some(0.0),
            size: 5,
        };
        let mut miss = hit.clone();
        miss.mean = 0.5;
        assert_eq!(welch_p_value(&hit, &miss), 0.0);
        assert_eq!(welch_p_value(&hit, &hit), 1.0);
    }
}
