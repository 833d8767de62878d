//! Sanar: self-healing locators and adaptive waits for browser test automation
//!
//! Sanar (Spanish: "to heal") is the resilience layer between a scenario
//! runner and a browser automation backend. It keeps UI tests running when
//! locators go stale and sizes waits from what each element actually takes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    SANAR Architecture                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   step executor                                                  │
//! │        │                                                         │
//! │        ▼                                                         │
//! │   ResilientPage ──► LocatorResolver ──► SuggestionClient (LLM)   │
//! │        │                 │                                       │
//! │        │                 ▼                                       │
//! │        └──────► WaitScheduler ──► HistoryStore (JSON files)      │
//! │                          │                                       │
//! │                          ▼                                       │
//! │                 AutomationDriver (Chromium / Mock)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sanar::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> SanarResult<()> {
//! let config = SanarConfig::default();
//! let store: Arc<dyn HistoryStore> = Arc::new(config.history_store());
//! let mut resolver = LocatorResolver::new(config.healing.clone(), store)
//!     .with_client(Arc::new(LlmSuggestionClient::from_config(&config.suggestion)));
//!
//! let driver = MockDriver::new().with_element("#login-button", MockElement::visible("button"));
//! let login = LocatorSpec::new("#login-button", "Login button");
//! let handle = resolver.resolve(&driver, &login, Duration::from_secs(5)).await?;
//! driver.click(&handle).await.ok();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

#[cfg(feature = "browser")]
#[allow(
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::doc_markdown
)]
mod cdp;
#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
mod config;
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation
)]
mod driver;
#[allow(clippy::cast_possible_truncation, clippy::module_name_repetitions)]
mod healing;
#[allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]
mod history;
mod locator;
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::missing_const_for_fn
)]
mod page;
#[allow(clippy::cast_precision_loss)]
mod pattern;
mod result;
#[allow(clippy::doc_markdown, clippy::module_name_repetitions)]
mod suggestion;
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]
mod wait;

#[cfg(feature = "browser")]
pub use cdp::{ChromiumConfig, ChromiumDriver};
pub use config::{
    ConfigError, HealingConfig, HistoryConfig, SanarConfig, SuggestionConfig, WaitConfig,
    DEFAULT_CONFIG_FILE,
};
pub use driver::{truncate_markup, AutomationDriver, ElementHandle, MockDriver, MockElement};
pub use healing::{AttemptOutcome, HealingStats, LocatorResolver, ResolutionAttempt};
pub use history::{
    FileHistoryStore, HealingLog, HistorySnapshot, HistoryStore, MemoryHistoryStore,
    PersistenceError, DEFAULT_MAX_RECORDS_PER_LOCATOR,
};
pub use locator::{ElementState, LocatorSpec};
pub use page::ResilientPage;
pub use pattern::{PatternTable, WaitPattern, DEFAULT_WINDOW};
pub use result::{DriverError, DriverResult, SanarError, SanarResult};
pub use suggestion::{
    ChatChoice, ChatMessage, ChatRequest, ChatResponse, LlmSuggestionClient,
    MockSuggestionClient, Role, SuggestionClient, SuggestionError, SuggestionRequest,
    SuggestionResponse,
};
pub use wait::{
    optimize_patterns, SuggestionKind, WaitOutcome, WaitScheduler, WaitSuggestion,
    INCREASE_FAILURE_RATE_ABOVE, REDUCE_AVG_BELOW_SECS, REDUCE_MAX_BELOW_SECS,
};

/// Prelude for convenient imports
pub mod prelude {
    #[cfg(feature = "browser")]
    pub use super::cdp::*;
    pub use super::config::*;
    pub use super::driver::*;
    pub use super::healing::*;
    pub use super::history::*;
    pub use super::locator::*;
    pub use super::page::*;
    pub use super::pattern::*;
    pub use super::result::*;
    pub use super::suggestion::*;
    pub use super::wait::*;
}
