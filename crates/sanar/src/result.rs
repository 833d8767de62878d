//! Result and error types for Sanar.
//!
//! Only [`SanarError`] crosses the library boundary. Suggestion-service and
//! persistence failures have their own types in [`crate::suggestion`] and
//! [`crate::history`] and are recovered where they happen.

use crate::locator::ElementState;
use thiserror::Error;

/// Result type for Sanar operations
pub type SanarResult<T> = Result<T, SanarError>;

/// Result type for automation backend calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported by an automation backend
#[derive(Debug, Error)]
pub enum DriverError {
    /// The element did not reach the requested state in time
    #[error("Timed out after {ms}ms waiting for {locator}")]
    Timeout {
        /// Locator that was waited on
        locator: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Backend-specific failure (crashed page, protocol error, bad locator syntax)
    #[error("Backend error: {message}")]
    Backend {
        /// Error message
        message: String,
    },

    /// The backend does not implement this primitive
    #[error("Operation not supported by backend: {0}")]
    NotSupported(String),
}

impl DriverError {
    /// Create a timeout error
    #[must_use]
    pub fn timeout(locator: impl Into<String>, ms: u64) -> Self {
        Self::Timeout {
            locator: locator.into(),
            ms,
        }
    }

    /// Create a backend error
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether this error is a plain timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors visible to a step executor
#[derive(Debug, Error)]
pub enum SanarError {
    /// The original locator never resolved, with or without a failed healing attempt
    #[error("Element not found: {locator} ({description}): {cause}")]
    ElementNotFound {
        /// The locator the caller asked for
        locator: String,
        /// Human-readable description of the element
        description: String,
        /// Failure of the original locator
        #[source]
        cause: DriverError,
    },

    /// An adaptive or explicit wait ran out of time
    #[error("Waiting for {locator_key} to be {state} timed out after {timeout_ms}ms")]
    WaitTimeout {
        /// Locator key the wait was keyed on
        locator_key: String,
        /// Target element state
        state: ElementState,
        /// Timeout that was applied, in milliseconds
        timeout_ms: u64,
        /// Backend failure
        #[source]
        cause: DriverError,
    },

    /// An interaction on an already resolved element failed
    #[error("{action} on {locator} failed: {cause}")]
    Action {
        /// Interaction name (click, fill, ...)
        action: &'static str,
        /// Locator or URL the action targeted
        locator: String,
        /// Backend failure
        #[source]
        cause: DriverError,
    },
}

impl SanarError {
    /// Create an element-not-found error
    #[must_use]
    pub fn element_not_found(
        locator: impl Into<String>,
        description: impl Into<String>,
        cause: DriverError,
    ) -> Self {
        Self::ElementNotFound {
            locator: locator.into(),
            description: description.into(),
            cause,
        }
    }

    /// The locator (or locator key) this error refers to
    #[must_use]
    pub fn locator(&self) -> &str {
        match self {
            Self::ElementNotFound { locator, .. } | Self::Action { locator, .. } => locator,
            Self::WaitTimeout { locator_key, .. } => locator_key,
        }
    }

    /// The underlying backend failure
    #[must_use]
    pub const fn cause(&self) -> &DriverError {
        match self {
            Self::ElementNotFound { cause, .. }
            | Self::WaitTimeout { cause, .. }
            | Self::Action { cause, .. } => cause,
        }
    }

    /// Whether this is an element-not-found error
    #[must_use]
    pub const fn is_element_not_found(&self) -> bool {
        matches!(self, Self::ElementNotFound { .. })
    }

    /// Whether this is a wait timeout
    #[must_use]
    pub const fn is_wait_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }
}
