//! Automation backend contract.
//!
//! The resolver and the scheduler only ever talk to a browser through the
//! [`AutomationDriver`] trait, so any engine can sit underneath:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  LocatorResolver / WaitScheduler                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  AutomationDriver (wait_for_state, click, fill, check, ...)   │
//! ├───────────────────────┬──────────────────────────────────────┤
//! │  ChromiumDriver       │  MockDriver                           │
//! │  (feature "browser")  │  (unit and scenario tests)            │
//! └───────────────────────┴──────────────────────────────────────┘
//! ```

use crate::locator::ElementState;
use crate::result::{DriverError, DriverResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Handle to a resolved element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Backend-specific identifier
    pub id: String,
    /// Locator the element was resolved with
    pub locator: String,
    /// Element tag name
    pub tag_name: String,
    /// Element text content
    pub text_content: Option<String>,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        locator: impl Into<String>,
        tag_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            tag_name: tag_name.into(),
            text_content: None,
        }
    }

    /// Set text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_content = Some(text.into());
        self
    }
}

/// Narrow browser contract consumed by the resilience layer
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Wait until `locator` reaches `state`, bounded by `timeout`.
    ///
    /// Returns a handle for [`ElementState::Visible`] and
    /// [`ElementState::Attached`], `None` for the other states.
    async fn wait_for_state(
        &self,
        locator: &str,
        state: ElementState,
        timeout: Duration,
    ) -> DriverResult<Option<ElementHandle>>;

    /// Click an element
    async fn click(&self, handle: &ElementHandle) -> DriverResult<()>;

    /// Replace the value of an input element
    async fn fill(&self, handle: &ElementHandle, text: &str) -> DriverResult<()>;

    /// Check a checkbox or radio button
    async fn check(&self, handle: &ElementHandle) -> DriverResult<()>;

    /// Current page markup, at most `max_bytes` long
    async fn page_snapshot(&self, max_bytes: usize) -> DriverResult<String>;

    /// Navigate to URL
    async fn navigate(&self, _url: &str) -> DriverResult<()> {
        Err(DriverError::NotSupported("navigate".into()))
    }

    /// Capture a PNG screenshot of the viewport
    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Err(DriverError::NotSupported("screenshot".into()))
    }
}

/// Cut `markup` to at most `max_bytes`, on a character boundary
#[must_use]
pub fn truncate_markup(markup: &str, max_bytes: usize) -> &str {
    if markup.len() <= max_bytes {
        return markup;
    }
    let mut end = max_bytes;
    while !markup.is_char_boundary(end) {
        end -= 1;
    }
    &markup[..end]
}

/// Scripted element for [`MockDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockElement {
    /// Tag name reported in handles
    pub tag_name: String,
    /// Delay before the element is attached (and visible, if `visible`)
    pub appear_after: Duration,
    /// Whether the element is rendered once attached
    pub visible: bool,
    /// Delay before the element goes away, if ever
    pub disappear_after: Option<Duration>,
}

impl MockElement {
    /// Element that is visible immediately
    #[must_use]
    pub fn visible(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            appear_after: Duration::ZERO,
            visible: true,
            disappear_after: None,
        }
    }

    /// Element that is attached but never rendered
    #[must_use]
    pub fn hidden(tag_name: impl Into<String>) -> Self {
        Self {
            visible: false,
            ..Self::visible(tag_name)
        }
    }

    /// Delay the element's appearance
    #[must_use]
    pub const fn appearing_after(mut self, delay: Duration) -> Self {
        self.appear_after = delay;
        self
    }

    /// Remove the element after a delay
    #[must_use]
    pub const fn disappearing_after(mut self, delay: Duration) -> Self {
        self.disappear_after = Some(delay);
        self
    }
}

/// Mock driver for unit testing
///
/// Delays are served with `tokio::time::sleep`, so tests running on paused
/// tokio time observe exact elapsed durations.
#[derive(Debug, Default)]
pub struct MockDriver {
    elements: HashMap<String, MockElement>,
    broken: HashSet<String>,
    failing_actions: HashSet<String>,
    markup: String,
    snapshot_delay: Duration,
    current_url: Mutex<String>,
    call_history: Mutex<Vec<String>>,
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scripted element
    #[must_use]
    pub fn with_element(mut self, locator: impl Into<String>, element: MockElement) -> Self {
        self.add_element(locator, element);
        self
    }

    /// Set the page markup served by `page_snapshot`
    #[must_use]
    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = markup.into();
        self
    }

    /// Make every call on `locator` fail with a backend error
    #[must_use]
    pub fn with_broken(mut self, locator: impl Into<String>) -> Self {
        self.broken.insert(locator.into());
        self
    }

    /// Make actions on `locator` fail while waits still resolve it
    #[must_use]
    pub fn with_failing_actions(mut self, locator: impl Into<String>) -> Self {
        self.failing_actions.insert(locator.into());
        self
    }

    /// Delay `page_snapshot` by `delay`
    #[must_use]
    pub const fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = delay;
        self
    }

    /// Add a scripted element
    pub fn add_element(&mut self, locator: impl Into<String>, element: MockElement) {
        self.elements.insert(locator.into(), element);
    }

    /// Remove a scripted element
    pub fn remove_element(&mut self, locator: &str) {
        self.elements.remove(locator);
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if a call starting with `prefix` was made
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.call_count(prefix) > 0
    }

    /// Number of calls starting with `prefix`
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Last navigated URL
    #[must_use]
    pub fn current_url(&self) -> String {
        self.current_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: String) {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn check_broken(&self, locator: &str) -> DriverResult<()> {
        if self.broken.contains(locator) {
            return Err(DriverError::backend(format!("mock failure on {locator}")));
        }
        Ok(())
    }

    fn check_action(&self, locator: &str) -> DriverResult<()> {
        self.check_broken(locator)?;
        if self.failing_actions.contains(locator) {
            return Err(DriverError::backend(format!("element {locator} is not interactable")));
        }
        Ok(())
    }

    /// Delay after which `locator` is in `state`, if it ever is
    fn reached_after(&self, locator: &str, state: ElementState) -> Option<Duration> {
        match (state, self.elements.get(locator)) {
            (ElementState::Visible, Some(el)) if el.visible => Some(el.appear_after),
            (ElementState::Attached, Some(el)) => Some(el.appear_after),
            (ElementState::Visible | ElementState::Attached, _) => None,
            (ElementState::Hidden | ElementState::Detached, None) => Some(Duration::ZERO),
            (ElementState::Hidden, Some(el)) if !el.visible => Some(Duration::ZERO),
            (ElementState::Hidden | ElementState::Detached, Some(el)) => el.disappear_after,
        }
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    async fn wait_for_state(
        &self,
        locator: &str,
        state: ElementState,
        timeout: Duration,
    ) -> DriverResult<Option<ElementHandle>> {
        self.record(format!("wait:{state}:{locator}"));
        self.check_broken(locator)?;

        match self.reached_after(locator, state) {
            Some(delay) if delay <= timeout => {
                tokio::time::sleep(delay).await;
                let handle = state.yields_handle().then(|| {
                    let tag = self
                        .elements
                        .get(locator)
                        .map_or("div", |el| el.tag_name.as_str());
                    ElementHandle::new(locator, locator, tag)
                });
                Ok(handle)
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Err(DriverError::timeout(locator, timeout.as_millis() as u64))
            }
        }
    }

    async fn click(&self, handle: &ElementHandle) -> DriverResult<()> {
        self.record(format!("click:{}", handle.locator));
        self.check_action(&handle.locator)
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> DriverResult<()> {
        self.record(format!("fill:{}:{text}", handle.locator));
        self.check_action(&handle.locator)
    }

    async fn check(&self, handle: &ElementHandle) -> DriverResult<()> {
        self.record(format!("check:{}", handle.locator));
        self.check_action(&handle.locator)
    }

    async fn page_snapshot(&self, max_bytes: usize) -> DriverResult<String> {
        self.record("snapshot".to_string());
        tokio::time::sleep(self.snapshot_delay).await;
        Ok(truncate_markup(&self.markup, max_bytes).to_string())
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.record(format!("navigate:{url}"));
        *self
            .current_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = url.to_string();
        Ok(())
    }
}
