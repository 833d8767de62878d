//! Locator specifications and element states.
//!
//! A locator is an opaque expression understood by the automation backend
//! (usually a CSS selector). Sanar never parses it; it only passes it to the
//! backend, to the suggestion service, and uses it as a key for learned data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A locator expression plus a human-readable description of the element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocatorSpec {
    /// Expression identifying zero or more elements
    pub locator: String,
    /// What the element is, for humans and for the suggestion service
    pub description: String,
}

impl LocatorSpec {
    /// Create a new locator spec
    #[must_use]
    pub fn new(locator: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            description: description.into(),
        }
    }

    /// Locator on a `data-testid` attribute
    #[must_use]
    pub fn test_id(id: &str, description: impl Into<String>) -> Self {
        Self::new(format!("[data-testid={id:?}]"), description)
    }

    /// The locator expression
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.locator
    }
}

impl From<&str> for LocatorSpec {
    fn from(locator: &str) -> Self {
        Self::new(locator, locator)
    }
}

impl fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() || self.description == self.locator {
            write!(f, "{}", self.locator)
        } else {
            write!(f, "{} ({})", self.locator, self.description)
        }
    }
}

/// Element state a wait can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementState {
    /// Attached and rendered with a non-empty box
    #[default]
    Visible,
    /// Not rendered, or not attached at all
    Hidden,
    /// Present in the DOM, rendered or not
    Attached,
    /// Absent from the DOM
    Detached,
}

impl ElementState {
    /// All states
    pub const ALL: [Self; 4] = [Self::Visible, Self::Hidden, Self::Attached, Self::Detached];

    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
            Self::Attached => "attached",
            Self::Detached => "detached",
        }
    }

    /// Whether reaching this state yields an element handle
    #[must_use]
    pub const fn yields_handle(&self) -> bool {
        matches!(self, Self::Visible | Self::Attached)
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ElementState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown element state: {s}"))
    }
}
