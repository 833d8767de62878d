//! Configuration for the resilience layer.
//!
//! Loaded from YAML (`sanar.yaml`), overridable from the environment, and
//! buildable in code with the `with_*` methods.

use crate::history::FileHistoryStore;
use crate::pattern::WaitPattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file looked up by [`SanarConfig::load_default`]
pub const DEFAULT_CONFIG_FILE: &str = "sanar.yaml";

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for this schema
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    /// Values are out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Locator healing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Ask the suggestion service when a locator fails
    pub enabled: bool,
    /// Retry the last recorded healed locator before asking the service
    pub reuse_known: bool,
    /// Suggestions reporting a lower confidence are ignored
    pub min_confidence: f64,
    /// Size of the page excerpt sent to the suggestion service
    pub snapshot_max_bytes: usize,
    /// Healed locators kept per original locator
    pub max_records_per_locator: usize,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reuse_known: true,
            min_confidence: 0.0,
            snapshot_max_bytes: 8 * 1024,
            max_records_per_locator: 10,
        }
    }
}

impl HealingConfig {
    /// Enable or disable healing
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enable or disable reuse of recorded healings
    #[must_use]
    pub const fn with_reuse_known(mut self, reuse: bool) -> Self {
        self.reuse_known = reuse;
        self
    }

    /// Set the minimum accepted confidence
    #[must_use]
    pub const fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = confidence;
        self
    }

    /// Set the page excerpt size
    #[must_use]
    pub const fn with_snapshot_max_bytes(mut self, bytes: usize) -> Self {
        self.snapshot_max_bytes = bytes;
        self
    }

    /// Set the per-locator retention cap
    #[must_use]
    pub const fn with_max_records_per_locator(mut self, max: usize) -> Self {
        self.max_records_per_locator = max;
        self
    }
}

/// Adaptive wait settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Timeout for locators without a recorded success
    pub default_timeout_ms: u64,
    /// Lower bound for adaptive timeouts
    pub min_timeout_ms: u64,
    /// Upper bound for adaptive timeouts
    pub max_timeout_ms: u64,
    /// Buffer applied to the observed mean
    pub multiplier: f64,
    /// Observations kept per locator key
    pub window: usize,
    /// Flush the pattern table every this many observations of a key
    pub flush_every: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            min_timeout_ms: 250,
            max_timeout_ms: 120_000,
            multiplier: 1.5,
            window: 50,
            flush_every: 10,
        }
    }
}

impl WaitConfig {
    /// Set the default timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set the adaptive timeout bounds
    #[must_use]
    pub const fn with_bounds(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.min_timeout_ms = min_ms;
        self.max_timeout_ms = max_ms;
        self
    }

    /// Set the multiplier
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the rolling window size
    #[must_use]
    pub const fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Set the flush interval
    #[must_use]
    pub const fn with_flush_every(mut self, every: u64) -> Self {
        self.flush_every = every;
        self
    }

    /// Default timeout as Duration
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Timeout for a locator given its learned pattern.
    ///
    /// With at least one recorded success this is `avg_time * multiplier`,
    /// clamped to the configured bounds; otherwise the default timeout.
    #[must_use]
    pub fn timeout_for(&self, pattern: Option<&WaitPattern>) -> Duration {
        match pattern {
            Some(p) if p.successes() > 0 => {
                let secs = (p.avg_time() * self.multiplier).max(0.0);
                let ms = (secs * 1000.0).round() as u64;
                let upper = self.max_timeout_ms.max(self.min_timeout_ms);
                Duration::from_millis(ms.clamp(self.min_timeout_ms, upper))
            }
            _ => self.default_timeout(),
        }
    }
}

/// Where learned data lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Directory holding both history files
    pub dir: PathBuf,
    /// Healing log file name
    pub healing_file: String,
    /// Wait-pattern log file name
    pub patterns_file: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".sanar"),
            healing_file: "healing_log.json".to_string(),
            patterns_file: "wait_patterns.json".to_string(),
        }
    }
}

impl HistoryConfig {
    /// Set the history directory
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Full path of the healing log
    #[must_use]
    pub fn healing_path(&self) -> PathBuf {
        self.dir.join(&self.healing_file)
    }

    /// Full path of the wait-pattern log
    #[must_use]
    pub fn patterns_path(&self) -> PathBuf {
        self.dir.join(&self.patterns_file)
    }
}

/// Suggestion service endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    /// Model name sent with each request
    pub model: String,
    /// HTTP timeout for one request
    pub timeout_ms: u64,
    /// Sampling temperature
    pub temperature: f64,
    /// Bearer token, if the service needs one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout_ms: 30_000,
            temperature: 0.0,
            api_key: None,
        }
    }
}

impl SuggestionConfig {
    /// Request timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanarConfig {
    /// Healing settings
    pub healing: HealingConfig,
    /// Wait settings
    pub waits: WaitConfig,
    /// History location
    pub history: HistoryConfig,
    /// Suggestion service
    pub suggestion: SuggestionConfig,
}

impl SanarConfig {
    /// Create default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set healing settings
    #[must_use]
    pub fn with_healing(mut self, healing: HealingConfig) -> Self {
        self.healing = healing;
        self
    }

    /// Set wait settings
    #[must_use]
    pub fn with_waits(mut self, waits: WaitConfig) -> Self {
        self.waits = waits;
        self
    }

    /// Set the history directory
    #[must_use]
    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history.dir = dir.into();
        self
    }

    /// Parse YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load `./sanar.yaml` if present, else defaults; then apply the environment
    pub fn load_default() -> Result<Self, ConfigError> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        let mut config = if local.exists() {
            Self::load_from(&local)?
        } else {
            Self::default()
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SANAR_*` overrides read through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SANAR_HEALING_ENABLED") {
            self.healing.enabled = parse_bool(&v).ok_or_else(|| {
                ConfigError::Invalid(format!("SANAR_HEALING_ENABLED must be a boolean, got {v:?}"))
            })?;
        }
        if let Some(v) = lookup("SANAR_HISTORY_DIR") {
            self.history.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SANAR_DEFAULT_TIMEOUT_MS") {
            self.waits.default_timeout_ms = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("SANAR_DEFAULT_TIMEOUT_MS must be an integer, got {v:?}"))
            })?;
        }
        if let Some(v) = lookup("SANAR_LLM_URL") {
            self.suggestion.base_url = v;
        }
        if let Some(v) = lookup("SANAR_LLM_MODEL") {
            self.suggestion.model = v;
        }
        if let Some(v) = lookup("SANAR_LLM_API_KEY") {
            self.suggestion.api_key = Some(v);
        }
        self.validate()
    }

    /// Reject values the scheduler and resolver cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waits.window == 0 {
            return Err(ConfigError::Invalid("waits.window must be at least 1".into()));
        }
        if self.waits.flush_every == 0 {
            return Err(ConfigError::Invalid(
                "waits.flush_every must be at least 1".into(),
            ));
        }
        if !(self.waits.multiplier > 0.0) {
            return Err(ConfigError::Invalid("waits.multiplier must be positive".into()));
        }
        if self.waits.min_timeout_ms > self.waits.max_timeout_ms {
            return Err(ConfigError::Invalid(
                "waits.min_timeout_ms exceeds waits.max_timeout_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.healing.min_confidence) {
            return Err(ConfigError::Invalid(
                "healing.min_confidence must be within 0.0..=1.0".into(),
            ));
        }
        if self.healing.max_records_per_locator == 0 {
            return Err(ConfigError::Invalid(
                "healing.max_records_per_locator must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// File-backed history store for this configuration
    #[must_use]
    pub fn history_store(&self) -> FileHistoryStore {
        FileHistoryStore::from_config(&self.history)
            .with_max_records_per_locator(self.healing.max_records_per_locator)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
