//! Adaptive waits.
//!
//! The scheduler learns how long each locator key takes to reach a state and
//! sizes the next timeout from that history instead of a fixed constant.
//! Every observation, success or failure, feeds the rolling window of its key;
//! the table is flushed to the [`HistoryStore`] every `flush_every`
//! observations of a key.

use crate::config::WaitConfig;
use crate::driver::{AutomationDriver, ElementHandle};
use crate::history::{HistoryStore, PersistenceError};
use crate::locator::ElementState;
use crate::pattern::{PatternTable, WaitPattern};
use crate::result::{SanarError, SanarResult};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Patterns averaging below this many seconds may get a shorter timeout
pub const REDUCE_AVG_BELOW_SECS: f64 = 2.0;

/// ...provided their slowest observation stays below this many seconds
pub const REDUCE_MAX_BELOW_SECS: f64 = 3.0;

/// Patterns failing more often than this get a longer timeout
pub const INCREASE_FAILURE_RATE_ABOVE: f64 = 0.2;

/// Result of a successful wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Time until the state was reached
    pub elapsed: Duration,
    /// Timeout that was applied
    pub timeout: Duration,
    /// Whether `timeout` was learned rather than given by the caller
    pub adaptive: bool,
    /// Element handle, for states that yield one
    pub handle: Option<ElementHandle>,
}

/// Direction of an advisory timeout change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    /// Element is consistently fast
    Reduce,
    /// Element fails often
    Increase,
}

impl fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reduce => f.write_str("reduce"),
            Self::Increase => f.write_str("increase"),
        }
    }
}

/// Advisory timeout change for one locator key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitSuggestion {
    /// Locator key
    pub locator_key: String,
    /// Reduce or increase
    pub kind: SuggestionKind,
    /// Mean of the window, seconds
    pub avg_time: f64,
    /// Maximum of the window, seconds
    pub max_time: f64,
    /// Share of failed observations
    pub failure_rate: f64,
    /// Suggested timeout, milliseconds
    pub suggested_timeout_ms: u64,
}

impl WaitSuggestion {
    /// Suggested timeout as Duration
    #[must_use]
    pub const fn suggested_timeout(&self) -> Duration {
        Duration::from_millis(self.suggested_timeout_ms)
    }
}

/// Advisory report over a pattern table, sorted by locator key.
///
/// A key fails more than [`INCREASE_FAILURE_RATE_ABOVE`] of the time gets
/// `max_time * 2`; otherwise a key with successes averaging under
/// [`REDUCE_AVG_BELOW_SECS`] and peaking under [`REDUCE_MAX_BELOW_SECS`] gets
/// `max_time * multiplier`. Nothing is applied.
#[must_use]
pub fn optimize_patterns(patterns: &PatternTable, config: &WaitConfig) -> Vec<WaitSuggestion> {
    patterns
        .iter()
        .filter_map(|(key, pattern)| {
            let (kind, secs) = if pattern.failure_rate() > INCREASE_FAILURE_RATE_ABOVE {
                (SuggestionKind::Increase, pattern.max_time() * 2.0)
            } else if pattern.successes() > 0
                && pattern.avg_time() < REDUCE_AVG_BELOW_SECS
                && pattern.max_time() < REDUCE_MAX_BELOW_SECS
            {
                (SuggestionKind::Reduce, pattern.max_time() * config.multiplier)
            } else {
                return None;
            };
            Some(WaitSuggestion {
                locator_key: key.to_string(),
                kind,
                avg_time: pattern.avg_time(),
                max_time: pattern.max_time(),
                failure_rate: pattern.failure_rate(),
                suggested_timeout_ms: (secs.max(0.0) * 1000.0).round() as u64,
            })
        })
        .collect()
}

/// Learns per-locator timeouts and performs waits with them
pub struct WaitScheduler {
    config: WaitConfig,
    store: Arc<dyn HistoryStore>,
    patterns: PatternTable,
    flushes: usize,
}

impl fmt::Debug for WaitScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitScheduler")
            .field("config", &self.config)
            .field("patterns", &self.patterns.len())
            .field("flushes", &self.flushes)
            .finish_non_exhaustive()
    }
}

impl WaitScheduler {
    /// Create a scheduler and load learned patterns from `store`
    #[must_use]
    pub fn new(config: WaitConfig, store: Arc<dyn HistoryStore>) -> Self {
        let mut patterns = store.load_patterns();
        patterns.normalize(config.window);
        debug!(patterns = patterns.len(), "wait patterns loaded");
        Self {
            config,
            store,
            patterns,
            flushes: 0,
        }
    }

    /// Wait configuration
    #[must_use]
    pub const fn config(&self) -> &WaitConfig {
        &self.config
    }

    /// Timeout the next wait on `key` would use
    #[must_use]
    pub fn adaptive_timeout(&self, key: &str) -> Duration {
        self.config.timeout_for(self.patterns.get(key))
    }

    /// Learned pattern for `key`
    #[must_use]
    pub fn pattern(&self, key: &str) -> Option<&WaitPattern> {
        self.patterns.get(key)
    }

    /// All learned patterns
    #[must_use]
    pub const fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    /// Number of flushes attempted
    #[must_use]
    pub const fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Wait until `key` reaches `state`.
    ///
    /// Without `timeout_override` the adaptive timeout for `key` applies. The
    /// observation is recorded whether or not the state is reached.
    ///
    /// # Errors
    ///
    /// [`SanarError::WaitTimeout`] when the backend does not report the state
    /// in time, or fails while waiting.
    pub async fn wait<D>(
        &mut self,
        driver: &D,
        key: &str,
        state: ElementState,
        timeout_override: Option<Duration>,
    ) -> SanarResult<WaitOutcome>
    where
        D: AutomationDriver + ?Sized,
    {
        let adaptive = timeout_override.is_none();
        let timeout = timeout_override.unwrap_or_else(|| self.adaptive_timeout(key));

        let start = Instant::now();
        let result = driver.wait_for_state(key, state, timeout).await;
        let elapsed = start.elapsed();

        self.record_observation(key, elapsed, result.is_ok());

        match result {
            Ok(handle) => {
                debug!(
                    locator = key,
                    %state,
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "wait satisfied"
                );
                Ok(WaitOutcome {
                    elapsed,
                    timeout,
                    adaptive,
                    handle,
                })
            }
            Err(cause) => {
                debug!(locator = key, %state, error = %cause, "wait failed");
                Err(SanarError::WaitTimeout {
                    locator_key: key.to_string(),
                    state,
                    timeout_ms: timeout.as_millis() as u64,
                    cause,
                })
            }
        }
    }

    /// Record one observation for `key`, flushing every `flush_every` observations
    pub fn record_observation(&mut self, key: &str, elapsed: Duration, success: bool) {
        let pattern = self.patterns.entry(key);
        pattern.record(elapsed, success, self.config.window);
        let observations = pattern.observations();

        if observations % self.config.flush_every.max(1) == 0 {
            if let Err(e) = self.flush() {
                warn!(locator = key, error = %e, "failed to persist wait patterns");
            }
        }
    }

    /// Write the full pattern table to the store
    ///
    /// # Errors
    ///
    /// Returns the store's error; callers log it and carry on.
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        self.flushes += 1;
        self.store.save_patterns(&self.patterns)?;
        info!(patterns = self.patterns.len(), "wait patterns flushed");
        Ok(())
    }

    /// Advisory timeout changes for the learned patterns
    #[must_use]
    pub fn optimize_waits(&self) -> Vec<WaitSuggestion> {
        optimize_patterns(&self.patterns, &self.config)
    }
}
