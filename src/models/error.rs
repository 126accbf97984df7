//! Error types for ormleak.
//!
//! Taxonomy:
//! - Expected failures: the target or the operator's settings do not allow
//!   a value to be extracted (not vulnerable, parameters could not be fitted)
//! - Infrastructure failures: network, timeout, filesystem
//! - Invariant violations: bugs, should not happen

use thiserror::Error;

/// Top-level error type for ormleak.
#[derive(Debug, Error)]
pub enum OrmLeakError {
    // ═══════════════════════════════════════════════════════════════════
    // EXPECTED FAILURES: the run cannot continue with these settings
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Target is not vulnerable: {0}")]
    NotVulnerable(String),

    #[error("Could not fit parameters: {0}")]
    CouldNotFitParameters(String),

    #[error("Max retries reached after {retries} attempts: increase the retry budget")]
    MaxRetriesReached { retries: usize },

    #[error("Invalid option for {option}: missing {placeholder} in value")]
    InvalidOption { option: String, placeholder: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE FAILURES
    // ═══════════════════════════════════════════════════════════════════

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT VIOLATIONS: should not happen
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrmLeakError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only infrastructure failures of untimed setup requests are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }

    /// Check if this error aborts an extraction run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::NotVulnerable(_)
                | Self::CouldNotFitParameters(_)
                | Self::MaxRetriesReached { .. }
                | Self::InvalidOption { .. }
                | Self::InvalidInput(_)
                | Self::Internal(_)
        )
    }

    /// Hint printed next to a fatal error.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CouldNotFitParameters(_) => Some(
                "a hit cannot be discerned by analysing processing times: \
                 try raising max_trials, lowering significance_level or \
                 increasing the starting DoS magnitude",
            ),
            Self::MaxRetriesReached { .. } => Some("raise stats.retries"),
            Self::NotVulnerable(_) => Some("check the target URL and attack settings"),
            _ => None,
        }
    }
}

/// Result type alias for ormleak.
pub type Result<T> = std::result::Result<T, OrmLeakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(OrmLeakError::CouldNotFitParameters("x".into()).is_fatal());
        assert!(OrmLeakError::MaxRetriesReached { retries: 2 }.is_fatal());
        assert!(OrmLeakError::NotVulnerable("x".into()).is_fatal());
        assert!(!OrmLeakError::Timeout(std::time::Duration::from_secs(1)).is_fatal());
        assert!(OrmLeakError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_max_retries_message() {
        let err = OrmLeakError::MaxRetriesReached { retries: 3 };
        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(err.hint(), Some("raise stats.retries"));
    }
}
