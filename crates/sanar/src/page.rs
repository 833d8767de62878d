//! Step-executor façade.
//!
//! [`ResilientPage`] bundles a driver with a [`LocatorResolver`] and a
//! [`WaitScheduler`] sharing one history store, so a scenario runner can write
//!
//! ```no_run
//! # use sanar::prelude::*;
//! # async fn step(page: &mut ResilientPage<MockDriver>) -> SanarResult<()> {
//! page.fill(&LocatorSpec::new("#email", "Email field"), "ada@example.com").await?;
//! page.click(&LocatorSpec::new("#login-button", "Login button")).await?;
//! page.wait_for("#dashboard", ElementState::Visible).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::SanarConfig;
use crate::driver::{AutomationDriver, ElementHandle};
use crate::healing::LocatorResolver;
use crate::history::HistoryStore;
use crate::locator::{ElementState, LocatorSpec};
use crate::result::{DriverError, SanarError, SanarResult};
use crate::suggestion::{LlmSuggestionClient, SuggestionClient};
use crate::wait::{WaitOutcome, WaitScheduler};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A page whose element lookups heal and whose waits adapt
#[derive(Debug)]
pub struct ResilientPage<D> {
    driver: D,
    resolver: LocatorResolver,
    scheduler: WaitScheduler,
}

impl<D: AutomationDriver> ResilientPage<D> {
    /// Build a page over `driver` with the given store and no suggestion client
    #[must_use]
    pub fn new(driver: D, config: &SanarConfig, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            driver,
            resolver: LocatorResolver::new(config.healing.clone(), Arc::clone(&store)),
            scheduler: WaitScheduler::new(config.waits.clone(), store),
        }
    }

    /// Build a page with the file-backed store and, when healing is enabled,
    /// the configured suggestion service
    #[must_use]
    pub fn from_config(driver: D, config: &SanarConfig) -> Self {
        let store: Arc<dyn HistoryStore> = Arc::new(config.history_store());
        let page = Self::new(driver, config, store);
        if config.healing.enabled {
            page.with_suggestion_client(Arc::new(LlmSuggestionClient::from_config(
                &config.suggestion,
            )))
        } else {
            page
        }
    }

    /// Heal through `client`
    #[must_use]
    pub fn with_suggestion_client(mut self, client: Arc<dyn SuggestionClient>) -> Self {
        self.resolver = self.resolver.with_client(client);
        self
    }

    /// Underlying driver
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Resolver, for diagnostics
    pub const fn resolver(&self) -> &LocatorResolver {
        &self.resolver
    }

    /// Scheduler, for diagnostics
    pub const fn scheduler(&self) -> &WaitScheduler {
        &self.scheduler
    }

    /// Resolve `spec` within the timeout learned for its locator
    pub async fn resolve(&mut self, spec: &LocatorSpec) -> SanarResult<ElementHandle> {
        let timeout = self.scheduler.adaptive_timeout(&spec.locator);
        self.resolve_within(spec, timeout).await
    }

    /// Resolve `spec` within `timeout`
    pub async fn resolve_within(
        &mut self,
        spec: &LocatorSpec,
        timeout: Duration,
    ) -> SanarResult<ElementHandle> {
        self.resolver.resolve(&self.driver, spec, timeout).await
    }

    /// Resolve the first visible of `candidates`
    pub async fn resolve_any(&mut self, candidates: &[LocatorSpec]) -> SanarResult<ElementHandle> {
        let timeout = candidates.first().map_or_else(
            || self.scheduler.config().default_timeout(),
            |first| self.scheduler.adaptive_timeout(&first.locator),
        );
        self.resolver
            .resolve_any(&self.driver, candidates, timeout)
            .await
    }

    /// Adaptive wait for `key` to reach `state`
    pub async fn wait_for(&mut self, key: &str, state: ElementState) -> SanarResult<WaitOutcome> {
        self.scheduler.wait(&self.driver, key, state, None).await
    }

    /// Wait for `key` to reach `state` within an explicit timeout
    pub async fn wait_for_within(
        &mut self,
        key: &str,
        state: ElementState,
        timeout: Duration,
    ) -> SanarResult<WaitOutcome> {
        self.scheduler
            .wait(&self.driver, key, state, Some(timeout))
            .await
    }

    /// Resolve and click
    pub async fn click(&mut self, spec: &LocatorSpec) -> SanarResult<()> {
        let handle = self.resolve(spec).await?;
        self.driver
            .click(&handle)
            .await
            .map_err(|cause| action_error("click", &handle, cause))
    }

    /// Resolve and replace the element's value with `text`
    pub async fn fill(&mut self, spec: &LocatorSpec, text: &str) -> SanarResult<()> {
        let handle = self.resolve(spec).await?;
        self.driver
            .fill(&handle, text)
            .await
            .map_err(|cause| action_error("fill", &handle, cause))
    }

    /// Resolve and check
    pub async fn check(&mut self, spec: &LocatorSpec) -> SanarResult<()> {
        let handle = self.resolve(spec).await?;
        self.driver
            .check(&handle)
            .await
            .map_err(|cause| action_error("check", &handle, cause))
    }

    /// Navigate to `url`
    pub async fn navigate(&mut self, url: &str) -> SanarResult<()> {
        self.driver
            .navigate(url)
            .await
            .map_err(|cause| SanarError::Action {
                action: "navigate",
                locator: url.to_string(),
                cause,
            })
    }

    /// Flush learned wait patterns and hand back the driver
    pub fn finish(mut self) -> D {
        if let Err(e) = self.scheduler.flush() {
            warn!(error = %e, "failed to persist wait patterns at end of scenario");
        }
        self.driver
    }
}

fn action_error(action: &'static str, handle: &ElementHandle, cause: DriverError) -> SanarError {
    SanarError::Action {
        action,
        locator: handle.locator.clone(),
        cause,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockElement};
    use crate::history::MemoryHistoryStore;
    use crate::suggestion::MockSuggestionClient;

    fn page_over(driver: MockDriver, store: &Arc<MemoryHistoryStore>) -> ResilientPage<MockDriver> {
        ResilientPage::new(
            driver,
            &SanarConfig::default(),
            Arc::clone(store) as Arc<dyn HistoryStore>,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_resolves_then_clicks() {
        let store = Arc::new(MemoryHistoryStore::new());
        let driver = MockDriver::new().with_element("#go", MockElement::visible("button"));
        let mut page = page_over(driver, &store);

        page.click(&LocatorSpec::new("#go", "Go")).await.unwrap();

        assert_eq!(
            page.driver().history(),
            vec!["wait:visible:#go".to_string(), "click:#go".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_acts_on_healed_element() {
        let store = Arc::new(MemoryHistoryStore::new());
        let driver = MockDriver::new().with_element("input[name=email]", MockElement::visible("input"));
        let client = Arc::new(MockSuggestionClient::responding(
            r#"{"locator":"input[name=email]"}"#,
        ));
        let mut page = page_over(driver, &store).with_suggestion_client(client);

        page.fill(&LocatorSpec::new("#email", "Email"), "ada@example.com")
            .await
            .unwrap();

        assert!(page.driver().was_called("fill:input[name=email]:ada@example.com"));
        assert_eq!(store.healing_saves(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_failure_reports_action() {
        let store = Arc::new(MemoryHistoryStore::new());
        let driver = MockDriver::new()
            .with_element("#box", MockElement::visible("input"))
            .with_failing_actions("#box");
        let mut page = page_over(driver, &store);

        let err = page.check(&LocatorSpec::from("#box")).await.unwrap_err();

        assert!(!err.is_element_not_found());
        match &err {
            SanarError::Action { action, locator, .. } => {
                assert_eq!(*action, "check");
                assert_eq!(locator, "#box");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().starts_with("check on #box failed"));
        assert_eq!(page.finish().call_count("check:#box"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_learns_and_finish_flushes() {
        let store = Arc::new(MemoryHistoryStore::new());
        let driver = MockDriver::new().with_element(
            "#dashboard",
            MockElement::visible("main").appearing_after(Duration::from_secs(2)),
        );
        let mut page = page_over(driver, &store);

        page.wait_for("#dashboard", ElementState::Visible)
            .await
            .unwrap();
        assert_eq!(
            page.scheduler().adaptive_timeout("#dashboard"),
            Duration::from_secs(3)
        );

        let driver = page.finish();
        assert_eq!(store.pattern_saves(), 1);
        assert!(store.snapshot().patterns.get("#dashboard").is_some());
        assert_eq!(driver.call_count("wait:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_uses_learned_timeout() {
        let store = Arc::new(MemoryHistoryStore::new());
        let mut page = page_over(MockDriver::new(), &store);
        page.scheduler.record_observation("#gone", Duration::from_secs(1), true);

        let start = tokio::time::Instant::now();
        let err = page.resolve(&LocatorSpec::from("#gone")).await.unwrap_err();

        assert!(err.is_element_not_found());
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_navigate_unsupported_is_action_error() {
        struct NoNav;

        #[async_trait::async_trait]
        impl AutomationDriver for NoNav {
            async fn wait_for_state(
                &self,
                locator: &str,
                _state: ElementState,
                timeout: Duration,
            ) -> crate::result::DriverResult<Option<ElementHandle>> {
                Err(DriverError::timeout(locator, timeout.as_millis() as u64))
            }
            async fn click(&self, _: &ElementHandle) -> crate::result::DriverResult<()> {
                Ok(())
            }
            async fn fill(&self, _: &ElementHandle, _: &str) -> crate::result::DriverResult<()> {
                Ok(())
            }
            async fn check(&self, _: &ElementHandle) -> crate::result::DriverResult<()> {
                Ok(())
            }
            async fn page_snapshot(&self, _: usize) -> crate::result::DriverResult<String> {
                Ok(String::new())
            }
        }

        let store = Arc::new(MemoryHistoryStore::new());
        let mut page = ResilientPage::new(
            NoNav,
            &SanarConfig::default(),
            store as Arc<dyn HistoryStore>,
        );
        let err = page.navigate("https://example.com").await.unwrap_err();
        assert!(matches!(
            err,
            SanarError::Action {
                action: "navigate",
                cause: DriverError::NotSupported(_),
                ..
            }
        ));
    }
}
