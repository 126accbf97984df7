//! Single-elimination reduction of several surviving hit candidates.

use super::session::{TimingSession, dedup};
use crate::models::{Result, TrialConfig};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentOutcome {
    /// The single remaining candidate, if any survived
    pub winner: Option<String>,
    /// Rounds of pairwise comparisons fired
    pub rounds: usize,
}

/// Re-pair survivors until at most one remains.
///
/// Each comparison yields at most one hit, so `n` survivors produce at
/// most `ceil(n / 2)` survivors in the next round.
pub async fn resolve(
    session: &TimingSession,
    survivors: Vec<String>,
    config: &TrialConfig,
) -> Result<TournamentOutcome> {
    let mut survivors = dedup(survivors);
    let mut rounds = 0;

    while survivors.len() > 1 {
        rounds += 1;
        debug!(round = rounds, survivors = ?survivors, "Tournament round");
        let batches = session.pairwise_batches(survivors, config.trials);
        survivors = dedup(session.run_pairs(batches, config).await?);
    }

    Ok(TournamentOutcome {
        winner: survivors.pop(),
        rounds,
    })
}
