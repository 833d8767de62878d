//! Chromium backend over the Chrome DevTools Protocol.
//!
//! Element state is polled with page-evaluated JavaScript; handles carry the
//! locator and are re-queried on every action, so a handle never points at a
//! detached node.

use crate::driver::{truncate_markup, AutomationDriver, ElementHandle};
use crate::locator::ElementState;
use crate::result::{DriverError, DriverResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Launch settings for [`ChromiumDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromiumConfig {
    /// Run without a window
    pub headless: bool,
    /// Keep the Chromium sandbox enabled
    pub sandbox: bool,
    /// Chromium executable, if not on the default search path
    pub chromium_path: Option<PathBuf>,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Delay between state polls
    pub poll_interval: Duration,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            chromium_path: None,
            viewport_width: 1280,
            viewport_height: 720,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ChromiumConfig {
    /// Show the browser window
    #[must_use]
    pub const fn with_head(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Disable the sandbox (needed in most containers)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Use a specific Chromium executable
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Set the state poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ElementStatus {
    attached: bool,
    visible: bool,
    tag: String,
    text: Option<String>,
}

impl ElementStatus {
    const fn satisfies(&self, state: ElementState) -> bool {
        match state {
            ElementState::Visible => self.visible,
            ElementState::Hidden => !self.visible,
            ElementState::Attached => self.attached,
            ElementState::Detached => !self.attached,
        }
    }
}

/// JavaScript string literal for `s`
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Interpret one state poll; only a locator the page rejects is an error
fn read_state(locator: &str, value: serde_json::Value) -> DriverResult<Option<ElementStatus>> {
    if let Some(error) = value.get("error").and_then(serde_json::Value::as_str) {
        return Err(DriverError::backend(format!("invalid locator {locator}: {error}")));
    }
    match serde_json::from_value(value) {
        Ok(status) => Ok(Some(status)),
        Err(e) => {
            debug!(locator, error = %e, "unexpected state poll result, retrying");
            Ok(None)
        }
    }
}

fn state_script(locator: &str) -> String {
    format!(
        "(() => {{ \
           let el; try {{ el = document.querySelector({sel}); }} catch (e) {{ return {{ error: String(e) }}; }} \
           if (!el) return {{ attached: false, visible: false, tag: '', text: null }}; \
           const style = window.getComputedStyle(el); \
           const rect = el.getBoundingClientRect(); \
           const visible = style.visibility !== 'hidden' && style.display !== 'none' \
             && rect.width > 0 && rect.height > 0; \
           return {{ attached: true, visible, tag: el.tagName.toLowerCase(), text: el.textContent }}; \
         }})()",
        sel = js_string(locator)
    )
}

fn backend(e: impl std::fmt::Display) -> DriverError {
    DriverError::backend(e.to_string())
}

/// [`AutomationDriver`] driving a real Chromium page
#[derive(Debug)]
pub struct ChromiumDriver {
    config: ChromiumConfig,
    browser: Arc<Mutex<Browser>>,
    page: Page,
    handler: tokio::task::JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch Chromium and open a blank page
    pub async fn launch(config: ChromiumConfig) -> DriverResult<Self> {
        let mut builder =
            BrowserConfig::builder().window_size(config.viewport_width, config.viewport_height);
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(DriverError::backend)?;

        let (browser, mut handler) = Browser::launch(cdp_config).await.map_err(backend)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(backend(e));
            }
        };
        debug!(headless = config.headless, "chromium launched");

        Ok(Self {
            config,
            browser: Arc::new(Mutex::new(browser)),
            page,
            handler,
        })
    }

    /// Launch settings
    #[must_use]
    pub const fn config(&self) -> &ChromiumConfig {
        &self.config
    }

    /// Close the browser
    pub async fn close(self) -> DriverResult<()> {
        self.browser.lock().await.close().await.map_err(backend)?;
        self.handler.abort();
        Ok(())
    }

    /// `Ok(None)` when the page could not be read this time (navigation in
    /// progress, execution context replaced)
    async fn poll_state(&self, locator: &str) -> DriverResult<Option<ElementStatus>> {
        let evaluated = match self.page.evaluate(state_script(locator)).await {
            Ok(evaluated) => evaluated,
            Err(e) => {
                debug!(locator, error = %e, "state poll failed, retrying");
                return Ok(None);
            }
        };
        match evaluated.into_value::<serde_json::Value>() {
            Ok(value) => read_state(locator, value),
            Err(e) => {
                debug!(locator, error = %e, "unreadable state poll result, retrying");
                Ok(None)
            }
        }
    }

    async fn run(&self, script: String) -> DriverResult<()> {
        let ok: bool = self
            .page
            .evaluate(script)
            .await
            .map_err(backend)?
            .into_value()
            .map_err(backend)?;
        if ok {
            Ok(())
        } else {
            Err(DriverError::backend("element is gone"))
        }
    }
}

#[async_trait]
impl AutomationDriver for ChromiumDriver {
    async fn wait_for_state(
        &self,
        locator: &str,
        state: ElementState,
        timeout: Duration,
    ) -> DriverResult<Option<ElementHandle>> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.poll_state(locator)).await {
                Ok(Ok(Some(status))) if status.satisfies(state) => {
                    let handle = state.yields_handle().then(|| {
                        let handle = ElementHandle::new(locator, locator, status.tag);
                        match status.text {
                            Some(text) => handle.with_text(text),
                            None => handle,
                        }
                    });
                    return Ok(handle);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep_until((now + self.config.poll_interval).min(deadline)).await;
        }
        Err(DriverError::timeout(locator, timeout.as_millis() as u64))
    }

    async fn click(&self, handle: &ElementHandle) -> DriverResult<()> {
        self.page
            .find_element(handle.locator.as_str())
            .await
            .map_err(backend)?
            .click()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> DriverResult<()> {
        self.run(format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
               el.focus(); el.value = {val}; \
               el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
               el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            sel = js_string(&handle.locator),
            val = js_string(text)
        ))
        .await
    }

    async fn check(&self, handle: &ElementHandle) -> DriverResult<()> {
        self.run(format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
               if (!el.checked) el.click(); return true; }})()",
            sel = js_string(&handle.locator)
        ))
        .await
    }

    async fn page_snapshot(&self, max_bytes: usize) -> DriverResult<String> {
        let markup = self.page.content().await.map_err(backend)?;
        Ok(truncate_markup(&markup, max_bytes).to_string())
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.page.goto(url).await.map_err(backend)?;
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page.screenshot(params).await.map_err(backend)
    }
}
