//! WebDriver-backed automation sessions
//!
//! One [`WebDriverSession`] is one browser launched through a WebDriver
//! endpoint (chromedriver). Scoped pages are tabs inside it. A worker drives
//! a single page at a time, so the session's current window always belongs
//! to the open page.

use crate::protocol;
use async_trait::async_trait;
use base64::Engine;
use imped_core::{AutomationSession, Locator, Page, SessionError, SessionFactory};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Delay between visibility checks
const VISIBILITY_POLL: Duration = Duration::from_millis(100);

/// Driver construction errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// HTTP client could not be built
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),

    /// Endpoint is not a usable URL
    #[error("invalid webdriver endpoint: {0}")]
    Endpoint(String),
}

/// WebDriver endpoint and browser options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Endpoint URL, e.g. a local chromedriver
    pub endpoint: String,
    /// Run the browser without a window
    pub headless: bool,
    /// Extra browser arguments
    pub args: Vec<String>,
    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9515".to_string(),
            headless: true,
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-setuid-sandbox".to_string(),
            ],
            request_timeout_ms: 180_000,
        }
    }
}

/// Thin JSON-over-HTTP client for one endpoint
#[derive(Debug, Clone)]
struct Wire {
    http: Client,
    endpoint: String,
}

impl Wire {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SessionError> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        tracing::trace!("{} {} -> {}", method, path, status);
        protocol::decode_response(status, &bytes)
    }
}

/// Launches browsers through a WebDriver endpoint
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    wire: Wire,
    config: WebDriverConfig,
}

impl WebDriverFactory {
    /// Create factory
    ///
    /// # Errors
    /// - `DriverError::Endpoint` if the endpoint is not an http(s) URL
    /// - `DriverError::Client` if the HTTP client cannot be built
    pub fn new(config: WebDriverConfig) -> Result<Self, DriverError> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(DriverError::Endpoint(config.endpoint));
        }

        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            wire: Wire { http, endpoint },
            config,
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &WebDriverConfig {
        &self.config
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn new_session(&self) -> Result<Box<dyn AutomationSession>, SessionError> {
        let body = protocol::new_session_body(&self.config.args, self.config.headless);
        let value = self
            .wire
            .send(Method::POST, "/session", Some(body))
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        let id = protocol::session_id(&value)?;

        tracing::debug!("webdriver session {} started", id);
        Ok(Box::new(WebDriverSession {
            inner: Arc::new(SessionInner {
                wire: self.wire.clone(),
                id,
            }),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct SessionInner {
    wire: Wire,
    id: String,
}

impl SessionInner {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SessionError> {
        let path = format!("/session/{}{}", self.id, path);
        self.wire.send(method, &path, body).await
    }

    async fn find(&self, locator: &Locator) -> Result<String, SessionError> {
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(protocol::find_element_body(locator)),
            )
            .await
            .map_err(|e| match e {
                SessionError::ElementNotFound(_) => {
                    SessionError::ElementNotFound(locator.to_string())
                }
                other => other,
            })?;
        protocol::element_id(&value)
    }

    async fn element(
        &self,
        method: Method,
        element: &str,
        action: &str,
        body: Option<Value>,
    ) -> Result<Value, SessionError> {
        self.command(method, &format!("/element/{element}/{action}"), body)
            .await
    }
}

/// One browser behind a WebDriver endpoint
#[derive(Debug)]
pub struct WebDriverSession {
    inner: Arc<SessionInner>,
    closed: AtomicBool,
}

#[async_trait]
impl AutomationSession for WebDriverSession {
    async fn open_page(&self) -> Result<Box<dyn Page>, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let value = self
            .inner
            .command(Method::POST, "/window/new", Some(json!({ "type": "tab" })))
            .await?;
        let handle = protocol::window_handle(&value)?;
        self.inner
            .command(Method::POST, "/window", Some(json!({ "handle": handle })))
            .await?;

        Ok(Box::new(WebDriverPage {
            session: Arc::clone(&self.inner),
            handle,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SessionError::Closed);
        }
        self.inner.command(Method::DELETE, "", None).await?;
        tracing::debug!("webdriver session {} closed", self.inner.id);
        Ok(())
    }
}

/// A browser tab
#[derive(Debug)]
pub struct WebDriverPage {
    session: Arc<SessionInner>,
    handle: String,
    closed: AtomicBool,
}

impl WebDriverPage {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    async fn is_displayed(&self, locator: &Locator) -> Result<bool, SessionError> {
        let element = match self.session.find(locator).await {
            Ok(element) => element,
            Err(SessionError::ElementNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match self
            .session
            .element(Method::GET, &element, "displayed", None)
            .await
        {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(SessionError::ElementNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Page for WebDriverPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        self.ensure_open()?;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.session
            .command(Method::POST, "/timeouts", Some(json!({ "pageLoad": timeout_ms })))
            .await?;
        self.session
            .command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map_err(|e| match e {
                SessionError::Timeout { .. } => SessionError::Timeout {
                    what: format!("navigation to {url}"),
                    timeout_ms,
                },
                other => other,
            })?;
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let element = self.session.find(locator).await?;
        self.session
            .element(Method::POST, &element, "clear", Some(json!({})))
            .await?;
        self.session
            .element(Method::POST, &element, "value", Some(json!({ "text": value })))
            .await?;
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> Result<(), SessionError> {
        self.ensure_open()?;
        let element = self.session.find(locator).await?;
        self.session
            .element(Method::POST, &element, "click", Some(json!({})))
            .await?;
        Ok(())
    }

    async fn wait_for_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_displayed(locator).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    what: locator.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            sleep(VISIBILITY_POLL).await;
        }
    }

    async fn read_text(&self, locator: &Locator) -> Result<String, SessionError> {
        self.ensure_open()?;
        let element = self.session.find(locator).await?;
        let value = self
            .session
            .element(Method::GET, &element, "text", None)
            .await?;
        Ok(value.as_str().unwrap_or_default().trim().to_string())
    }

    async fn screenshot_region(&self, locator: &Locator) -> Result<Vec<u8>, SessionError> {
        self.ensure_open()?;
        let element = self.session.find(locator).await?;
        let value = self
            .session
            .element(Method::GET, &element, "screenshot", None)
            .await?;
        let encoded = value.as_str().unwrap_or_default();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SessionError::Protocol {
                error: "invalid screenshot".to_string(),
                message: e.to_string(),
            })
    }

    async fn set_download_directory(&self, dir: &Path) -> Result<(), SessionError> {
        self.ensure_open()?;
        // Chrome resolves relative download paths against its own cwd
        let absolute = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| SessionError::Protocol {
                    error: "invalid download path".to_string(),
                    message: e.to_string(),
                })?
                .join(dir)
        };
        let body = protocol::download_behavior_body(&absolute.to_string_lossy());
        self.session
            .command(Method::POST, "/goog/cdp/execute", Some(body))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SessionError::Closed);
        }
        let remaining = self.session.command(Method::DELETE, "/window", None).await?;
        let remaining = protocol::string_list(&remaining);
        if let Some(next) = remaining.iter().find(|h| **h != self.handle) {
            self.session
                .command(Method::POST, "/window", Some(json!({ "handle": next })))
                .await?;
        }
        Ok(())
    }
}
