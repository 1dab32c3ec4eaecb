//! Automation session capability
//!
//! The pipeline never talks to a browser directly. It drives these traits:
//! - [`SessionFactory`] launches one isolated session per worker
//! - [`AutomationSession`] opens scoped pages (tabs) inside a session
//! - [`Page`] is the DOM-level surface the state machine uses
//!
//! Concrete backends live outside this crate.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Element locator
///
/// Textual form is `xpath=<expr>` for XPath and either `css=<sel>` or a bare
/// selector for CSS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    /// CSS selector
    Css(String),
    /// XPath expression
    XPath(String),
}

impl Locator {
    /// CSS locator
    #[inline]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// XPath locator
    #[inline]
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Raw selector or expression
    #[inline]
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Css(s) | Self::XPath(s) => s,
        }
    }
}

impl FromStr for Locator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let locator = if let Some(expr) = s.strip_prefix("xpath=") {
            Self::XPath(expr.trim().to_string())
        } else if let Some(sel) = s.strip_prefix("css=") {
            Self::Css(sel.trim().to_string())
        } else {
            Self::Css(s.to_string())
        };

        if locator.value().is_empty() {
            return Err(format!("empty locator: {s:?}"));
        }
        Ok(locator)
    }
}

impl TryFrom<String> for Locator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(value: Locator) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(s) => f.write_str(s),
            Self::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Launches independent automation sessions
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Start a new isolated session
    async fn new_session(&self) -> Result<Box<dyn AutomationSession>, SessionError>;
}

/// One isolated automation context (a browser window)
#[async_trait::async_trait]
pub trait AutomationSession: Send + Sync {
    /// Open a scoped page inside this session
    async fn open_page(&self) -> Result<Box<dyn Page>, SessionError>;

    /// Release the session
    async fn close(&self) -> Result<(), SessionError>;
}

/// A scoped page inside a session
#[async_trait::async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for the page to settle
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Replace the value of an input field
    async fn fill(&self, locator: &Locator, value: &str) -> Result<(), SessionError>;

    /// Click an element
    async fn click(&self, locator: &Locator) -> Result<(), SessionError>;

    /// Wait until an element is visible
    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration)
        -> Result<(), SessionError>;

    /// Read an element's trimmed text
    async fn read_text(&self, locator: &Locator) -> Result<String, SessionError>;

    /// Capture an element as a PNG image
    async fn screenshot_region(&self, locator: &Locator) -> Result<Vec<u8>, SessionError>;

    /// Direct downloads triggered by this page into `dir`
    async fn set_download_directory(&self, dir: &Path) -> Result<(), SessionError>;

    /// Close the page
    async fn close(&self) -> Result<(), SessionError>;
}

/// Race several visibility conditions and return the tag of the first one met
///
/// Losing waits are dropped as soon as a winner is known. If every condition
/// fails the last error is returned.
///
/// # Errors
/// - `SessionError::Timeout` if nothing became visible in time
pub async fn race_visible<T: Copy>(
    page: &dyn Page,
    conditions: &[(T, &Locator)],
    timeout: Duration,
) -> Result<T, SessionError> {
    if conditions.is_empty() {
        return Err(SessionError::Timeout {
            what: "no conditions".to_string(),
            timeout_ms: 0,
        });
    }

    let waits = conditions.iter().map(|&(tag, locator)| {
        Box::pin(async move { page.wait_for_visible(locator, timeout).await.map(|()| tag) })
    });

    let (tag, _losers) = futures::future::select_ok(waits).await?;
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_parse_forms() {
        assert_eq!(
            "xpath=//button[1]".parse::<Locator>().unwrap(),
            Locator::xpath("//button[1]")
        );
        assert_eq!("css=#a".parse::<Locator>().unwrap(), Locator::css("#a"));
        assert_eq!("#txtFechaI".parse::<Locator>().unwrap(), Locator::css("#txtFechaI"));
        assert!("xpath=".parse::<Locator>().is_err());
    }

    #[test]
    fn locator_display_round_trips() {
        let loc = Locator::xpath("//span");
        assert_eq!(loc.to_string(), "xpath=//span");
        assert_eq!(loc.to_string().parse::<Locator>().unwrap(), loc);
    }
}
