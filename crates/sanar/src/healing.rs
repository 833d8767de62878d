//! Self-healing locator resolution.
//!
//! ```text
//! resolve(spec, timeout)
//!   │
//!   ├─ wait visible(spec.locator) ──────────────── ok ─► handle
//!   │        │ failed (original cause kept)
//!   ├─ healing disabled / no client ────────────────────► ElementNotFound(cause)
//!   ├─ last recorded healing (short wait) ──────── ok ─► handle   (no write)
//!   ├─ page snapshot ─► suggestion service   (together bounded by timeout)
//!   │        │ error / malformed / rejected ────────────► ElementNotFound(cause)
//!   └─ wait visible(suggested) ─────────────────── ok ─► record + save ─► handle
//!            │ failed ──────────────────────────────────► ElementNotFound(cause)
//! ```
//!
//! Only [`SanarError::ElementNotFound`] ever leaves the resolver, and it always
//! carries the failure of the caller's own locator.

use crate::config::HealingConfig;
use crate::driver::{truncate_markup, AutomationDriver, ElementHandle};
use crate::history::{HealingLog, HistoryStore};
use crate::locator::{ElementState, LocatorSpec};
use crate::result::{DriverError, DriverResult, SanarError, SanarResult};
use crate::suggestion::{SuggestionClient, SuggestionError, SuggestionRequest, SuggestionResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest wait for a recorded healing; the page already had a full timeout to settle
const KNOWN_HEALING_WAIT: Duration = Duration::from_millis(500);

/// How one resolve call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    /// An element handle was returned
    Success,
    /// `ElementNotFound` was returned
    Failure,
}

/// Record of the most recent resolve call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionAttempt {
    /// Locator the caller asked for
    pub original_locator: String,
    /// Locator that actually resolved, when it differs from the original
    pub healed_locator: Option<String>,
    /// Success or failure
    pub outcome: AttemptOutcome,
    /// Whether a healed locator was tried
    pub used_healing: bool,
    /// Whether the healed locator came from the healing log
    pub from_history: bool,
}

impl ResolutionAttempt {
    fn direct(locator: &str) -> Self {
        Self {
            original_locator: locator.to_string(),
            healed_locator: None,
            outcome: AttemptOutcome::Success,
            used_healing: false,
            from_history: false,
        }
    }

    fn healed(locator: &str, healed: &str, from_history: bool) -> Self {
        Self {
            original_locator: locator.to_string(),
            healed_locator: Some(healed.to_string()),
            outcome: AttemptOutcome::Success,
            used_healing: true,
            from_history,
        }
    }

    fn alternative(locator: &str, used: &str) -> Self {
        Self {
            healed_locator: Some(used.to_string()),
            ..Self::direct(locator)
        }
    }

    fn failed(locator: &str, used_healing: bool) -> Self {
        Self {
            original_locator: locator.to_string(),
            healed_locator: None,
            outcome: AttemptOutcome::Failure,
            used_healing,
            from_history: false,
        }
    }

    /// Whether an element was returned
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Running counters over all resolve calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealingStats {
    /// Resolved by the caller's locator (or one of its explicit alternatives)
    pub resolved_directly: u64,
    /// Resolved by a healing recorded in an earlier run
    pub reused: u64,
    /// Resolved by a fresh suggestion
    pub healed: u64,
    /// Ended in `ElementNotFound`
    pub failed: u64,
    /// Suggestion service calls that errored or timed out
    pub service_errors: u64,
}

impl HealingStats {
    /// Total resolve calls
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.resolved_directly + self.reused + self.healed + self.failed
    }
}

/// Resolves locators against the live page, healing them when they break
pub struct LocatorResolver {
    config: HealingConfig,
    store: Arc<dyn HistoryStore>,
    client: Option<Arc<dyn SuggestionClient>>,
    log: HealingLog,
    last_attempt: Option<ResolutionAttempt>,
    stats: HealingStats,
}

impl std::fmt::Debug for LocatorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatorResolver")
            .field("config", &self.config)
            .field("has_client", &self.client.is_some())
            .field("known_locators", &self.log.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl LocatorResolver {
    /// Create a resolver and load the healing log from `store`.
    ///
    /// Without a suggestion client (see [`Self::with_client`]) the resolver
    /// never heals.
    #[must_use]
    pub fn new(config: HealingConfig, store: Arc<dyn HistoryStore>) -> Self {
        let log = store.load_healing();
        debug!(known_locators = log.len(), "healing log loaded");
        Self {
            config,
            store,
            client: None,
            log,
            last_attempt: None,
            stats: HealingStats::default(),
        }
    }

    /// Use `client` for suggestions
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn SuggestionClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Healing configuration
    #[must_use]
    pub const fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// In-memory healing log
    #[must_use]
    pub const fn healing_log(&self) -> &HealingLog {
        &self.log
    }

    /// The most recent resolve call
    #[must_use]
    pub const fn last_attempt(&self) -> Option<&ResolutionAttempt> {
        self.last_attempt.as_ref()
    }

    /// Counters since construction
    #[must_use]
    pub const fn stats(&self) -> HealingStats {
        self.stats
    }

    /// Resolve `spec` to a visible element within `timeout`.
    ///
    /// # Errors
    ///
    /// [`SanarError::ElementNotFound`] carrying the failure of `spec.locator`
    /// when neither the locator nor any healing of it resolves.
    pub async fn resolve<D>(
        &mut self,
        driver: &D,
        spec: &LocatorSpec,
        timeout: Duration,
    ) -> SanarResult<ElementHandle>
    where
        D: AutomationDriver + ?Sized,
    {
        match find_visible(driver, &spec.locator, timeout).await {
            Ok(handle) => Ok(self.resolved_directly(&spec.locator, handle)),
            Err(cause) => self.heal(driver, spec, timeout, cause).await,
        }
    }

    /// Resolve the first of `candidates` that becomes visible.
    ///
    /// Candidates are tried in order, each with the full `timeout`. Only when
    /// all of them fail is the first candidate healed.
    ///
    /// # Errors
    ///
    /// [`SanarError::ElementNotFound`] for the first candidate.
    pub async fn resolve_any<D>(
        &mut self,
        driver: &D,
        candidates: &[LocatorSpec],
        timeout: Duration,
    ) -> SanarResult<ElementHandle>
    where
        D: AutomationDriver + ?Sized,
    {
        let Some(first) = candidates.first() else {
            self.stats.failed += 1;
            return Err(SanarError::element_not_found(
                "",
                "",
                DriverError::backend("no candidate locators"),
            ));
        };

        let mut first_cause = None;
        for spec in candidates {
            match find_visible(driver, &spec.locator, timeout).await {
                Ok(handle) if spec.locator == first.locator => {
                    return Ok(self.resolved_directly(&first.locator, handle));
                }
                Ok(handle) => {
                    debug!(original = %first.locator, used = %spec.locator, "resolved by explicit alternative");
                    self.stats.resolved_directly += 1;
                    self.last_attempt =
                        Some(ResolutionAttempt::alternative(&first.locator, &spec.locator));
                    return Ok(handle);
                }
                Err(cause) => {
                    debug!(locator = %spec.locator, error = %cause, "candidate failed");
                    first_cause.get_or_insert(cause);
                }
            }
        }

        let cause = first_cause.unwrap_or_else(|| DriverError::timeout(&first.locator, 0));
        self.heal(driver, first, timeout, cause).await
    }

    fn resolved_directly(&mut self, locator: &str, handle: ElementHandle) -> ElementHandle {
        debug!(locator, "resolved");
        self.stats.resolved_directly += 1;
        self.last_attempt = Some(ResolutionAttempt::direct(locator));
        handle
    }

    fn fail(&mut self, spec: &LocatorSpec, cause: DriverError, used_healing: bool) -> SanarError {
        self.stats.failed += 1;
        self.last_attempt = Some(ResolutionAttempt::failed(&spec.locator, used_healing));
        SanarError::element_not_found(&spec.locator, &spec.description, cause)
    }

    async fn heal<D>(
        &mut self,
        driver: &D,
        spec: &LocatorSpec,
        timeout: Duration,
        cause: DriverError,
    ) -> SanarResult<ElementHandle>
    where
        D: AutomationDriver + ?Sized,
    {
        let Some(client) = self.client.clone().filter(|_| self.config.enabled) else {
            debug!(locator = %spec.locator, "healing unavailable");
            return Err(self.fail(spec, cause, false));
        };

        // reuse wait, snapshot and service call share one `timeout`
        let deadline = Instant::now() + timeout;

        if self.config.reuse_known {
            if let Some(known) = self.log.latest(&spec.locator).map(str::to_string) {
                match find_visible(driver, &known, KNOWN_HEALING_WAIT.min(timeout)).await {
                    Ok(handle) => {
                        info!(original = %spec.locator, healed = %known, "reused recorded healing");
                        self.stats.reused += 1;
                        self.last_attempt =
                            Some(ResolutionAttempt::healed(&spec.locator, &known, true));
                        return Ok(handle);
                    }
                    Err(e) => debug!(healed = %known, error = %e, "recorded healing no longer resolves"),
                }
            }
        }

        let Some(suggested) = self
            .ask_for_suggestion(driver, client.as_ref(), spec, deadline)
            .await
        else {
            return Err(self.fail(spec, cause, false));
        };

        match find_visible(driver, &suggested, timeout).await {
            Ok(handle) => {
                info!(original = %spec.locator, healed = %suggested, "locator healed");
                self.record(&spec.locator, &suggested);
                self.stats.healed += 1;
                self.last_attempt = Some(ResolutionAttempt::healed(&spec.locator, &suggested, false));
                Ok(handle)
            }
            Err(e) => {
                warn!(original = %spec.locator, suggested = %suggested, error = %e, "suggested locator did not resolve");
                Err(self.fail(spec, cause, true))
            }
        }
    }

    /// Returns a validated replacement locator, or `None` for "no suggestion"
    async fn ask_for_suggestion<D>(
        &mut self,
        driver: &D,
        client: &dyn SuggestionClient,
        spec: &LocatorSpec,
        deadline: Instant,
    ) -> Option<String>
    where
        D: AutomationDriver + ?Sized,
    {
        let max_bytes = self.config.snapshot_max_bytes;
        let snapshot = tokio::time::timeout_at(deadline, driver.page_snapshot(max_bytes)).await;
        let markup = match snapshot {
            Ok(Ok(markup)) => markup,
            Ok(Err(e)) => {
                warn!(error = %e, "page snapshot failed, asking without page context");
                String::new()
            }
            Err(_) => {
                warn!("page snapshot timed out, asking without page context");
                String::new()
            }
        };
        let request = SuggestionRequest::new(
            &spec.locator,
            &spec.description,
            truncate_markup(&markup, max_bytes),
        );

        let started = Instant::now();
        let reply = match tokio::time::timeout_at(deadline, client.suggest(&request)).await {
            Ok(reply) => reply,
            Err(_) => Err(SuggestionError::Timeout {
                ms: deadline.saturating_duration_since(started).as_millis() as u64,
            }),
        };
        let text = match reply {
            Ok(text) => text,
            Err(e) => {
                warn!(locator = %spec.locator, error = %e, "suggestion service failed");
                self.stats.service_errors += 1;
                return None;
            }
        };

        let Some(suggestion) = SuggestionResponse::parse(&text) else {
            warn!(locator = %spec.locator, "malformed suggestion ignored");
            return None;
        };
        self.validate(spec, suggestion)
    }

    fn validate(&self, spec: &LocatorSpec, suggestion: SuggestionResponse) -> Option<String> {
        if suggestion.locator == spec.locator.trim() {
            debug!(locator = %spec.locator, "suggestion repeats the failed locator");
            return None;
        }
        if let Some(confidence) = suggestion.confidence {
            if confidence < self.config.min_confidence {
                debug!(
                    locator = %spec.locator,
                    suggested = %suggestion.locator,
                    confidence,
                    min = self.config.min_confidence,
                    "suggestion below confidence threshold"
                );
                return None;
            }
        }
        Some(suggestion.locator)
    }

    fn record(&mut self, original: &str, healed: &str) {
        self.log
            .record(original, healed, self.config.max_records_per_locator);
        if let Err(e) = self.store.save_healing(&self.log) {
            warn!(original, healed, error = %e, "failed to persist healing record");
        }
    }
}

async fn find_visible<D>(driver: &D, locator: &str, timeout: Duration) -> DriverResult<ElementHandle>
where
    D: AutomationDriver + ?Sized,
{
    driver
        .wait_for_state(locator, ElementState::Visible, timeout)
        .await?
        .ok_or_else(|| DriverError::backend(format!("no element handle for {locator}")))
}
