//! Configuration models for ormleak.
//!
//! Every tunable of an extraction run is parameterized here; the operator
//! resolves them at runtime via a TOML file plus CLI overrides.

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default search alphabet: ASCII letters, digits and punctuation.
pub const DEFAULT_CHARS: &str = concat!(
    "abcdefghijklmnopqrstuvwxyz",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "0123456789",
    "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~",
);

/// Top-level configuration for an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The HTTP endpoint under attack
    pub target: TargetConfig,

    /// Character search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Statistical settings for time-based attacks
    #[serde(default)]
    pub stats: StatsConfig,

    /// Target-specific attack settings
    pub attack: AttackConfig,
}

/// HTTP target configuration.
///
/// These options are opaque to the extraction engine; only the oracle
/// implementations read them when sending requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target URL
    pub url: String,

    /// HTTP method used for probes
    #[serde(default = "default_method")]
    pub method: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for untimed setup requests
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Optional proxy URL (e.g. "http://127.0.0.1:8080")
    #[serde(default)]
    pub proxy: Option<String>,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Custom headers to include in requests
    /// Values can contain ${ENV_VAR} for environment variable expansion
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

/// Character search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Characters to try at each position
    #[serde(default = "default_chars")]
    pub chars: String,

    /// Known prefix of the dumped value to resume from
    #[serde(default)]
    pub dumped_prefix: String,

    /// Maximum number of requests in flight
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Stop once the dumped value reaches this length
    #[serde(default)]
    pub max_length: Option<usize>,
}

fn default_chars() -> String {
    DEFAULT_CHARS.to_string()
}

fn default_threads() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            chars: default_chars(),
            dumped_prefix: String::new(),
            threads: default_threads(),
            max_length: None,
        }
    }
}

/// Statistical configuration for time-based attacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Initial number of trials per candidate
    #[serde(default = "default_trials")]
    pub trials: usize,

    /// p-value threshold below which a timing difference is a hit
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    /// Upper bound the trial count may be escalated to
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,

    /// Factor applied to the trial count when an error is detected
    #[serde(default = "default_trials_multiplier")]
    pub trials_multiplier: f64,

    /// Failed rounds tolerated before giving up
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Log per-candidate statistics and show batch progress
    #[serde(default)]
    pub verbose: bool,

    /// Search for a workable trial count before exploitation
    #[serde(default)]
    pub do_trials_search: bool,

    /// Consecutive significant comparisons required by the trial search
    #[serde(default = "default_search_comparisons")]
    pub search_comparisons: usize,

    /// Skip hypothesis testing and always pick the slowest candidate
    #[serde(default)]
    pub use_highest_mean: bool,
}

fn default_trials() -> usize {
    10
}

fn default_significance_level() -> f64 {
    0.1
}

fn default_max_trials() -> usize {
    200
}

fn default_trials_multiplier() -> f64 {
    1.5
}

fn default_retries() -> usize {
    2
}

fn default_search_comparisons() -> usize {
    5
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            significance_level: default_significance_level(),
            max_trials: default_max_trials(),
            trials_multiplier: default_trials_multiplier(),
            retries: default_retries(),
            verbose: false,
            do_trials_search: false,
            search_comparisons: default_search_comparisons(),
            use_highest_mean: false,
        }
    }
}

/// A template given inline or read from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSource {
    /// Template text
    Inline(String),
    /// Path to a file holding the template
    File { file: PathBuf },
}

impl TemplateSource {
    /// Resolve the template text.
    pub fn load(&self) -> Result<String, ConfigError> {
        match self {
            Self::Inline(text) => Ok(text.clone()),
            Self::File { file } => {
                std::fs::read_to_string(file).map_err(|e| ConfigError::FileRead {
                    path: file.clone(),
                    source: e,
                })
            }
        }
    }
}

/// Target-specific attack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AttackConfig {
    /// Boolean oracle over a JSON body template
    JsonBlind(JsonBlindConfig),
    /// Time-based attack on Prisma `where` filters using `contains`
    PrismaContains(PrismaContainsConfig),
    /// Time-based attack on Django filter lookups using `__in`
    DjangoFilter(DjangoFilterConfig),
    /// CVE-2023-22894 on Strapi
    Strapi(StrapiConfig),
}

impl AttackConfig {
    /// Short name used in logs and checkpoints.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JsonBlind(_) => "json-blind",
            Self::PrismaContains(_) => "prisma-contains",
            Self::DjangoFilter(_) => "django-filter",
            Self::Strapi(_) => "strapi",
        }
    }

    /// Whether the attack measures processing time instead of reading results.
    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::PrismaContains(_) | Self::DjangoFilter(_))
    }
}

/// Boolean oracle over a JSON body template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonBlindConfig {
    /// JSON body with `{ORM_LEAK}` where the tested value goes
    pub template: TemplateSource,

    /// JSON pointer to the value that is non-empty on a hit ("" = whole body)
    #[serde(default)]
    pub success_pointer: String,

    /// Also test `c + known` (the filter uses a contains operation)
    #[serde(default)]
    pub contains: bool,

    /// A value known to match, checked before exploitation
    #[serde(default)]
    pub known_hit: Option<String>,

    /// A value known not to match, checked before exploitation
    #[serde(default)]
    pub known_miss: Option<String>,
}

/// Prisma `contains` time-based attack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrismaContainsConfig {
    /// Request body with `{PAYLOAD}` where the filter goes
    pub base_query: TemplateSource,

    /// Filter using `startsWith`, with `{ORM_LEAK}` for the tested value
    pub leak_query: TemplateSource,

    /// Filter using `contains`, with `{RANDOM_STRING}` for a random token
    pub contains_payload: TemplateSource,

    /// Starting number of `contains` clauses
    #[serde(default = "default_start_dos_length")]
    pub start_contains_length: usize,

    /// Upper bound on the number of `contains` clauses
    #[serde(default = "default_max_contains_length")]
    pub max_contains_length: usize,

    /// Max number of characters to leak (used to size the fitting probe)
    #[serde(default = "default_max_leak_length")]
    pub max_leak_length: usize,

    /// Leak query over a column with a known value, for the trial search
    #[serde(default)]
    pub calibration_leak_query: Option<TemplateSource>,

    /// Value known to be a prefix of the calibration column
    #[serde(default)]
    pub hit_value: Option<String>,
}

fn default_start_dos_length() -> usize {
    10
}

fn default_max_contains_length() -> usize {
    100_000
}

fn default_max_leak_length() -> usize {
    256
}

/// Django filter time-based attack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DjangoFilterConfig {
    /// Relation to dump from (e.g. "author")
    pub dump_key: String,

    /// Field of the related model to dump (e.g. "password")
    pub dump_val: String,

    /// Relation traversed to slow the query down on a hit
    pub dos_key: String,

    /// Fields of the DoS relation filtered with `__in`
    pub dos_fields: Vec<String>,

    /// Starting length of each `__in` array
    #[serde(default = "default_start_dos_length")]
    pub start_dos_length: usize,

    /// Upper bound on the `__in` array length
    #[serde(default = "default_max_dos_length")]
    pub max_dos_length: usize,

    /// Name of the parameter wrapping the filter, if any
    #[serde(default)]
    pub where_filter_name: Option<String>,

    /// Field with a known value, for the trial search
    #[serde(default)]
    pub search_dump_val: Option<String>,

    /// Value known to be a prefix of `search_dump_val`
    #[serde(default)]
    pub hit_value: Option<String>,

    /// Extra filters merged into every payload
    #[serde(default)]
    pub additional_filter_opts: serde_json::Map<String, serde_json::Value>,
}

fn default_max_dos_length() -> usize {
    2000
}

/// Strapi version targeted by CVE-2023-22894.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrapiVersion {
    V3,
    #[default]
    V4,
}

/// Strapi CVE-2023-22894 campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrapiConfig {
    #[serde(default)]
    pub version: StrapiVersion,

    /// Only dump the first super admin found
    #[serde(default)]
    pub dump_first_admin: bool,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Validate values that serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.url.is_empty() {
            return Err(ConfigError::Invalid("target.url is empty".to_string()));
        }
        for (name, value) in expand_headers(&self.target.headers) {
            if HeaderName::try_from(name.as_str()).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "target.headers: '{name}' is not a valid header name"
                )));
            }
            if HeaderValue::from_str(&value).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "target.headers: the value of '{name}' is not a valid header value"
                )));
            }
        }
        if self.search.chars.is_empty() {
            return Err(ConfigError::Invalid("search.chars is empty".to_string()));
        }
        if self.search.threads == 0 {
            return Err(ConfigError::Invalid("search.threads must be at least 1".to_string()));
        }

        let stats = &self.stats;
        if !(stats.significance_level > 0.0 && stats.significance_level < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "stats.significance_level must be in (0, 1), got {}",
                stats.significance_level
            )));
        }
        if stats.trials_multiplier <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "stats.trials_multiplier must be greater than 1, got {}",
                stats.trials_multiplier
            )));
        }
        if stats.trials == 0 || stats.max_trials < stats.trials {
            return Err(ConfigError::Invalid(format!(
                "stats.trials ({}) must be in 1..=max_trials ({})",
                stats.trials, stats.max_trials
            )));
        }
        if stats.do_trials_search && stats.search_comparisons == 0 {
            return Err(ConfigError::Invalid(
                "stats.search_comparisons must be at least 1".to_string(),
            ));
        }

        if let AttackConfig::DjangoFilter(django) = &self.attack {
            if django.dos_fields.is_empty() {
                return Err(ConfigError::Invalid(
                    "attack.dos_fields must name at least one field".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid proxy '{url}': {source}")]
    Proxy {
        url: String,
        source: reqwest::Error,
    },
}
