//! Retroactive validation of accepted values.
//!
//! Each value of the chain is re-tested against a fresh random control.
//! A correct chain is significant from its first entry up to some point
//! and insignificant after it; anything else means the measurements
//! cannot be trusted at the current trial count.

use super::session::TimingSession;
use crate::models::{OrmLeakError, Result, TrialConfig};
use tracing::{info, warn};

/// Mean p-value below `significance_level * RELAX_FACTOR` relaxes the trials.
const RELAX_FACTOR: f64 = 0.05;

/// Shape of a chain of significance checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainShape {
    /// No entry was significant
    Lost,
    /// First entry insignificant, or an insignificant entry between two
    /// significant ones
    Broken,
    /// The first `n` entries are significant and the rest are not
    Prefix(usize),
}

/// Classify the significance flags of a chain.
pub fn chain_shape(significant: &[bool]) -> ChainShape {
    if !significant.iter().any(|s| *s) {
        return ChainShape::Lost;
    }
    if !significant[0] {
        return ChainShape::Broken;
    }
    let prefix = significant.iter().take_while(|s| **s).count();
    if significant[prefix..].iter().any(|s| *s) {
        return ChainShape::Broken;
    }
    ChainShape::Prefix(prefix)
}

/// Validate `chain` (oldest first) and return its trusted prefix.
///
/// A broken chain escalates the trial count and is re-tested, at most
/// `config.retries` times. An unbroken chain that is confirmed on the
/// first attempt with a mean p-value far below the threshold relaxes the
/// trial count by 25%.
pub async fn correct_path(
    session: &TimingSession,
    chain: &[String],
    config: &mut TrialConfig,
) -> Result<Vec<String>> {
    let mut attempt = 0;

    loop {
        let mut significant = Vec::with_capacity(chain.len());
        let mut p_values = Vec::with_capacity(chain.len());
        for value in chain {
            let check = session.check_is_significant(value, config).await?;
            if !check.significant {
                info!(value = %value, p_value = check.p_value, "Value is not statistically significant");
            }
            significant.push(check.significant);
            p_values.push(check.p_value);
        }

        match chain_shape(&significant) {
            ChainShape::Lost => return Ok(Vec::new()),
            ChainShape::Broken => {
                let trials = config.escalate()?;
                attempt += 1;
                if attempt > config.retries {
                    return Err(OrmLeakError::MaxRetriesReached {
                        retries: config.retries,
                    });
                }
                warn!(trials = trials, attempt = attempt, "Identified error in dumped values, adjusted trials");
            }
            ChainShape::Prefix(len) => {
                if attempt == 0 && len == chain.len() {
                    let mean_p = p_values.iter().sum::<f64>() / p_values.len() as f64;
                    if mean_p < config.significance_level * RELAX_FACTOR {
                        let trials = config.relax();
                        info!(trials = trials, mean_p_value = mean_p, "Path check confident, dropping trials");
                    }
                }
                return Ok(chain[..len].to_vec());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_shapes() {
        assert_eq!(chain_shape(&[true, true, true]), ChainShape::Prefix(3));
        assert_eq!(chain_shape(&[true, true, false]), ChainShape::Prefix(2));
        assert_eq!(chain_shape(&[true, false, false]), ChainShape::Prefix(1));
        assert_eq!(chain_shape(&[false, false, false]), ChainShape::Lost);
        assert_eq!(chain_shape(&[false, true, true]), ChainShape::Broken);
        assert_eq!(chain_shape(&[true, false, true]), ChainShape::Broken);
    }
}
