//! End-to-end extraction runs against in-process oracles.
//!
//! Timing oracles sleep on tokio's paused clock, so measured latencies are
//! exactly the simulated ones and the tests run instantly.

use async_trait::async_trait;
use ormleak::engine::{
    FitSettings, TimingSession, correct_path, fit_dos_magnitude, fit_params, resolve, trials_search,
};
use ormleak::models::{Alphabet, Payload, ProbeResponse, TrialConfig};
use ormleak::oracle::{BooleanOracle, DosSearch, Oracle, TimingOracle};
use ormleak::pipeline::{BlindExtractor, ExtractionSettings, Phase, TimingExtractor};
use ormleak::{CheckpointManager, OrmLeakError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Boolean oracle
// ============================================================================

struct SecretOracle {
    secret: String,
    contains: bool,
    requests: AtomicUsize,
}

impl SecretOracle {
    fn new(secret: &str, contains: bool) -> Self {
        Self {
            secret: secret.to_string(),
            contains,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Oracle for SecretOracle {
    fn name(&self) -> &str {
        "secret"
    }

    fn create_payload(&self, candidate: &str) -> Payload {
        Payload::Query(candidate.to_string())
    }

    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let Payload::Query(candidate) = payload else {
            return Ok(ProbeResponse::new(400, ""));
        };
        let hit = if self.contains {
            self.secret.contains(candidate.as_str())
        } else {
            self.secret.starts_with(candidate.as_str())
        };
        Ok(ProbeResponse::new(200, if hit { "hit" } else { "" }))
    }
}

impl BooleanOracle for SecretOracle {
    fn was_success_result(&self, response: &ProbeResponse) -> bool {
        response.body == "hit"
    }

    fn is_contains_attack(&self) -> bool {
        self.contains
    }
}

fn alphabet(chars: &str) -> Alphabet {
    Alphabet::new(chars).unwrap()
}

#[tokio::test]
async fn test_blind_extracts_secret() {
    for secret in ["ab", "ba"] {
        let oracle = Arc::new(SecretOracle::new(secret, false));
        let mut extractor = BlindExtractor::new(oracle, alphabet("ab"), 4);
        let stats = extractor.run().await.unwrap();
        assert_eq!(stats.value, secret);
        assert_eq!(stats.characters_accepted, 2);
    }
}

#[tokio::test]
async fn test_blind_without_hit_keeps_prefix() {
    let oracle = Arc::new(SecretOracle::new("zzz", false));
    let mut extractor = BlindExtractor::new(oracle, alphabet("ab"), 2).with_prefix("x");
    let stats = extractor.run().await.unwrap();
    assert_eq!(stats.value, "x");
    assert_eq!(stats.characters_accepted, 0);
}

#[tokio::test]
async fn test_blind_contains_grows_both_ways() {
    let oracle = Arc::new(SecretOracle::new("cab", true));
    let mut extractor = BlindExtractor::new(oracle, alphabet("abc"), 3).with_prefix("a");
    let stats = extractor.run().await.unwrap();
    assert_eq!(stats.value, "cab");
}

#[tokio::test]
async fn test_blind_stops_at_max_length() {
    let oracle = Arc::new(SecretOracle::new("abba", false));
    let mut extractor = BlindExtractor::new(oracle, alphabet("ab"), 2).with_max_length(Some(2));
    let stats = extractor.run().await.unwrap();
    assert_eq!(stats.value, "ab");
}

#[tokio::test]
async fn test_blind_records_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut checkpoint = CheckpointManager::new(dir.path()).unwrap();
    checkpoint.init_or_load("json-blind", "http://t", "", None).unwrap();

    let oracle = Arc::new(SecretOracle::new("ba", false));
    let mut extractor = BlindExtractor::new(oracle, alphabet("ab"), 2).with_checkpoint(checkpoint);
    extractor.run().await.unwrap();

    let mut reloaded = CheckpointManager::new(dir.path()).unwrap();
    let state = reloaded.load().unwrap();
    assert_eq!(state.known_value, "ba");
    assert!(state.complete);
}

// ============================================================================
// Timing oracle
// ============================================================================

const MISS_LATENCY: Duration = Duration::from_millis(10);
const HIT_LATENCY: Duration = Duration::from_millis(200);

/// Slow when the candidate is a prefix of the secret, with seeded jitter.
///
/// With a decoy, the decoy is leaked instead of the secret until a
/// one-character candidate is sent after any candidate of three characters
/// or more. The first path correction after the third accepted character
/// therefore sees the real secret.
struct SlowPrefixOracle {
    secret: String,
    decoy: Option<String>,
    seen_long: AtomicBool,
    decoy_over: AtomicBool,
    magnitude: AtomicUsize,
    /// Largest magnitude the simulated server accepts
    max_accepted: usize,
    jitter: Mutex<StdRng>,
    requests: AtomicUsize,
}

impl SlowPrefixOracle {
    fn new(secret: &str, max_accepted: usize) -> Self {
        Self {
            secret: secret.to_string(),
            decoy: None,
            seen_long: AtomicBool::new(false),
            decoy_over: AtomicBool::new(false),
            magnitude: AtomicUsize::new(4),
            max_accepted,
            jitter: Mutex::new(StdRng::seed_from_u64(7)),
            requests: AtomicUsize::new(0),
        }
    }

    fn with_decoy(mut self, decoy: &str) -> Self {
        self.decoy = Some(decoy.to_string());
        self
    }

    /// The value the simulated server currently leaks.
    fn leaked(&self, candidate: &str) -> &str {
        let len = candidate.chars().count();
        if len >= 3 {
            self.seen_long.store(true, Ordering::SeqCst);
        } else if len == 1 && self.seen_long.load(Ordering::SeqCst) {
            self.decoy_over.store(true, Ordering::SeqCst);
        }
        match &self.decoy {
            Some(decoy) if !self.decoy_over.load(Ordering::SeqCst) => decoy,
            _ => &self.secret,
        }
    }

    fn jitter(&self) -> Duration {
        let micros = self.jitter.lock().unwrap().random_range(0..2000);
        Duration::from_micros(micros)
    }
}

#[async_trait]
impl Oracle for SlowPrefixOracle {
    fn name(&self) -> &str {
        "slow-prefix"
    }

    fn create_payload(&self, candidate: &str) -> Payload {
        self.add_orm_leak_payload(self.build_dos_payload(), candidate)
    }

    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let body = payload.as_json().cloned().unwrap_or_default();

        let magnitude = body["dos"].as_u64().unwrap_or(0) as usize;
        if magnitude > self.max_accepted {
            return Ok(ProbeResponse::new(413, "payload too large"));
        }

        let hit = body["leak"]
            .as_str()
            .is_some_and(|candidate| self.leaked(candidate).starts_with(candidate));
        let latency = if hit { HIT_LATENCY } else { MISS_LATENCY } + self.jitter();
        tokio::time::sleep(latency).await;
        Ok(ProbeResponse::new(200, "[]"))
    }
}

impl TimingOracle for SlowPrefixOracle {
    fn build_dos_payload(&self) -> Payload {
        Payload::Json(json!({ "dos": self.dos_magnitude() }))
    }

    fn add_orm_leak_payload(&self, dos: Payload, candidate: &str) -> Payload {
        let mut body = dos.as_json().cloned().unwrap_or_default();
        body["leak"] = json!(candidate);
        Payload::Json(body)
    }

    fn dos_magnitude(&self) -> usize {
        self.magnitude.load(Ordering::SeqCst)
    }

    fn set_dos_magnitude(&self, magnitude: usize) {
        self.magnitude.store(magnitude, Ordering::SeqCst);
    }

    fn dos_search(&self) -> DosSearch {
        DosSearch::Halving {
            initial_step: 8,
            max: 64,
        }
    }
}

fn trial_config() -> TrialConfig {
    TrialConfig {
        trials: 6,
        significance_level: 1e-4,
        max_trials: 50,
        trials_multiplier: 1.5,
        retries: 1,
        use_highest_mean: false,
    }
}

fn settings(chars: &str) -> ExtractionSettings {
    ExtractionSettings {
        alphabet: alphabet(chars),
        prefix: String::new(),
        threads: 4,
        max_length: None,
        trials: trial_config(),
        verbose: false,
        do_trials_search: false,
        search_comparisons: 3,
    }
}

fn session(oracle: Arc<dyn TimingOracle>, chars: &str) -> TimingSession {
    TimingSession::new(oracle, alphabet(chars), 4, false)
}

#[tokio::test(start_paused = true)]
async fn test_timing_extracts_secret() {
    let oracle = Arc::new(SlowPrefixOracle::new("cab", 20));
    let mut extractor = TimingExtractor::new(oracle.clone(), settings("abc")).unwrap();

    let stats = extractor.run().await.unwrap();

    assert_eq!(stats.value, "cab");
    assert_eq!(extractor.phase(), Phase::Done);
    assert_eq!(oracle.dos_magnitude(), 20);
    assert!(stats.final_trials.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_timing_empty_round_at_trial_ceiling_completes() {
    let oracle = Arc::new(SlowPrefixOracle::new("cab", 20));
    let mut settings = settings("abc");
    settings.trials.max_trials = 6;
    let mut extractor = TimingExtractor::new(oracle, settings).unwrap();

    let stats = extractor.run().await.unwrap();

    assert_eq!(stats.value, "cab");
    assert_eq!(extractor.phase(), Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn test_timing_backtracks_wrong_character() {
    let dir = tempfile::tempdir().unwrap();
    let mut checkpoint = CheckpointManager::new(dir.path()).unwrap();
    checkpoint
        .init_or_load("prisma-contains", "http://t", "", Some(6))
        .unwrap();

    let oracle = Arc::new(SlowPrefixOracle::new("cab", 64).with_decoy("cbb"));
    let mut extractor = TimingExtractor::new(oracle, settings("abc"))
        .unwrap()
        .with_checkpoint(checkpoint);

    let stats = extractor.run().await.unwrap();

    assert_eq!(stats.value, "cab");
    assert_eq!(stats.backtracks, 1);
    assert_eq!(extractor.phase(), Phase::Done);

    let mut reloaded = CheckpointManager::new(dir.path()).unwrap();
    let state = reloaded.load().unwrap();
    assert_eq!(state.backtracks, 1);
    assert_eq!(state.known_value, "cab");
    assert!(state.complete);
}

#[tokio::test(start_paused = true)]
async fn test_timing_stops_at_max_length() {
    let oracle = Arc::new(SlowPrefixOracle::new("cabbage", 64));
    let mut settings = settings("abceg");
    settings.max_length = Some(3);
    settings.prefix = "c".to_string();
    let mut extractor = TimingExtractor::new(oracle, settings).unwrap();

    let stats = extractor.run().await.unwrap();
    assert_eq!(stats.value, "cab");
}

#[tokio::test(start_paused = true)]
async fn test_timing_requires_two_characters() {
    let oracle = Arc::new(SlowPrefixOracle::new("aaa", 64));
    let result = TimingExtractor::new(oracle, settings("a"));
    assert!(matches!(result, Err(OrmLeakError::InvalidInput(_))));
}

#[tokio::test(start_paused = true)]
async fn test_fit_rejected_at_start_fails_extraction() {
    let oracle = Arc::new(SlowPrefixOracle::new("cab", 0));
    let mut extractor = TimingExtractor::new(oracle.clone(), settings("abc")).unwrap();

    let result = extractor.run().await;

    assert!(matches!(result, Err(OrmLeakError::CouldNotFitParameters(_))));
    assert_eq!(extractor.phase(), Phase::Failed);
    assert_eq!(extractor.known(), "");
    assert_eq!(oracle.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fit_halving_keeps_last_accepted() {
    let oracle = SlowPrefixOracle::new("", 37);
    let fitted = fit_dos_magnitude(&oracle).await.unwrap();
    // 4 → 12 → 20 → 28 → 36, then 44/40/38 rejected
    assert_eq!(fitted, 36);
    assert_eq!(oracle.dos_magnitude(), 36);
}

#[tokio::test(start_paused = true)]
async fn test_trials_search_without_calibration_fails() {
    let oracle: Arc<dyn TimingOracle> = Arc::new(SlowPrefixOracle::new("cab", 20));
    let fit = FitSettings {
        alphabet: alphabet("abc"),
        threads: 2,
        do_trials_search: true,
        search_comparisons: 2,
        verbose: false,
    };
    let mut config = trial_config();

    let result = fit_params(&oracle, &fit, &mut config).await;
    assert!(matches!(result, Err(OrmLeakError::CouldNotFitParameters(_))));
}

#[tokio::test(start_paused = true)]
async fn test_trials_search_is_idempotent() {
    let session = session(Arc::new(SlowPrefixOracle::new("cab", 64)), "abc");
    let mut config = trial_config();

    let first = trials_search(&session, "ca", &mut config, 3).await.unwrap();
    let second = trials_search(&session, "ca", &mut config, 3).await.unwrap();

    assert_eq!(first, 6);
    assert_eq!(second, first);
}

#[tokio::test(start_paused = true)]
async fn test_trials_search_without_signal_exhausts_max_trials() {
    let session = session(Arc::new(SlowPrefixOracle::new("cab", 64)), "abc");
    let mut config = trial_config();

    let result = trials_search(&session, "bb", &mut config, 2).await;
    assert!(matches!(result, Err(OrmLeakError::CouldNotFitParameters(_))));
    assert!(config.trials <= config.max_trials);
}

// ============================================================================
// Tournament and path correction
// ============================================================================

/// Latency grows with the candidate's rank, so every comparison has a winner.
struct RankedOracle {
    ranks: HashMap<String, u64>,
}

#[async_trait]
impl Oracle for RankedOracle {
    fn name(&self) -> &str {
        "ranked"
    }

    fn create_payload(&self, candidate: &str) -> Payload {
        self.add_orm_leak_payload(self.build_dos_payload(), candidate)
    }

    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse> {
        let Payload::Query(candidate) = payload else {
            return Ok(ProbeResponse::new(400, ""));
        };
        let rank = self.ranks.get(candidate).copied().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(10 + 50 * rank)).await;
        Ok(ProbeResponse::new(200, ""))
    }
}

impl TimingOracle for RankedOracle {
    fn build_dos_payload(&self) -> Payload {
        Payload::Query(String::new())
    }

    fn add_orm_leak_payload(&self, _dos: Payload, candidate: &str) -> Payload {
        Payload::Query(candidate.to_string())
    }

    fn dos_magnitude(&self) -> usize {
        1
    }

    fn set_dos_magnitude(&self, _magnitude: usize) {}

    fn dos_search(&self) -> DosSearch {
        DosSearch::Linear {
            step: 1,
            backoff: 1,
            max: 1,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_tournament_reduces_to_slowest() {
    let values = ["a", "b", "c", "d", "e"];
    let ranks = values
        .iter()
        .enumerate()
        .map(|(i, v)| (v.to_string(), i as u64))
        .collect();
    let session = session(Arc::new(RankedOracle { ranks }), "abcde");
    let survivors: Vec<String> = values.iter().map(|v| v.to_string()).collect();

    let outcome = resolve(&session, survivors, &trial_config()).await.unwrap();

    assert_eq!(outcome.winner.as_deref(), Some("e"));
    // ceil(log2(5)) = 3
    assert!(outcome.rounds <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_tournament_trivial_inputs() {
    let session = session(Arc::new(RankedOracle { ranks: HashMap::new() }), "ab");

    let empty = resolve(&session, Vec::new(), &trial_config()).await.unwrap();
    assert_eq!(empty.winner, None);
    assert_eq!(empty.rounds, 0);

    let single = resolve(&session, vec!["a".into(), "a".into()], &trial_config())
        .await
        .unwrap();
    assert_eq!(single.winner.as_deref(), Some("a"));
    assert_eq!(single.rounds, 0);
}

fn chain(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_correct_path_keeps_valid_chain() {
    let session = session(Arc::new(SlowPrefixOracle::new("cab", 64)), "abcx");
    let mut config = trial_config();

    let corrected = correct_path(&session, &chain(&["c", "ca", "cab"]), &mut config)
        .await
        .unwrap();

    assert_eq!(corrected, chain(&["c", "ca", "cab"]));
    assert!(config.trials <= 6);
}

#[tokio::test(start_paused = true)]
async fn test_correct_path_truncates_trailing_miss() {
    let session = session(Arc::new(SlowPrefixOracle::new("cab", 64)), "abcx");
    let mut config = trial_config();

    let corrected = correct_path(&session, &chain(&["c", "ca", "cax"]), &mut config)
        .await
        .unwrap();

    assert_eq!(corrected, chain(&["c", "ca"]));
}

#[tokio::test(start_paused = true)]
async fn test_correct_path_hole_escalates_then_gives_up() {
    let session = session(Arc::new(SlowPrefixOracle::new("cab", 64)), "abcx");
    let mut config = trial_config();

    let result = correct_path(&session, &chain(&["c", "x", "cab"]), &mut config).await;

    assert!(matches!(result, Err(OrmLeakError::MaxRetriesReached { retries: 1 })));
    // 6 → 9 → 14
    assert_eq!(config.trials, 14);
}

#[tokio::test(start_paused = true)]
async fn test_correct_path_lost_chain() {
    let session = session(Arc::new(SlowPrefixOracle::new("cab", 64)), "abcx");
    let mut config = trial_config();

    let corrected = correct_path(&session, &chain(&["x", "xa"]), &mut config)
        .await
        .unwrap();
    assert!(corrected.is_empty());
}
