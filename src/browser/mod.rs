//! Headless Chrome over CDP (chromiumoxide).
//!
//! [`BrowserSession`] is the whole surface the rest of the crate needs from a
//! browser. The admin automation and the page renderer both go through it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BrowserSettings;

/// Poll interval while waiting for an element.
const WAIT_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("timed out")]
    Timeout,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser error: {0}")]
    Browser(String),
}

/// Scripted access to one browser tab.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Wait until `selector` matches, failing with `NotFound` after `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), SessionError>;

    async fn fill(&self, selector: &str, value: &str) -> Result<(), SessionError>;

    async fn click(&self, selector: &str) -> Result<(), SessionError>;

    /// Text of the first match, `None` when nothing matches.
    async fn read_text(&self, selector: &str) -> Result<Option<String>, SessionError>;

    /// Text of every match, in document order.
    async fn read_texts(&self, selector: &str) -> Result<Vec<String>, SessionError>;

    async fn set_input_files(&self, selector: &str, path: &Path) -> Result<(), SessionError>;

    /// Scroll down by one viewport height.
    async fn scroll_page(&self) -> Result<(), SessionError>;

    /// Current document HTML.
    async fn html(&self) -> Result<String, SessionError>;
}

/// A launched Chrome process plus its CDP handler task.
pub struct ChromeBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromeBrowser {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    fn find_chrome(settings: &BrowserSettings) -> Option<PathBuf> {
        if let Some(path) = &settings.chrome_executable {
            return Some(PathBuf::from(path));
        }
        Self::CHROME_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf)
    }

    pub async fn launch(
        settings: &BrowserSettings,
        navigation_timeout: Duration,
    ) -> Result<Self, SessionError> {
        info!("Launching browser (headless={})", settings.headless);

        let mut builder = BrowserConfig::builder();
        if let Some(path) = Self::find_chrome(settings) {
            debug!("Using Chrome at {}", path.display());
            builder = builder.chrome_executable(path);
        }
        if !settings.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--window-size=1366,850");

        let config = builder.build().map_err(SessionError::Browser)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            navigation_timeout,
        })
    }

    /// Open a fresh tab.
    pub async fn new_session(&self) -> Result<ChromeSession, SessionError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;
        Ok(ChromeSession {
            page,
            navigation_timeout: self.navigation_timeout,
        })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        self.handler.abort();
    }
}

/// One tab of a [`ChromeBrowser`].
pub struct ChromeSession {
    page: Page,
    navigation_timeout: Duration,
}

impl ChromeSession {
    pub async fn close(self) {
        if let Err(e) = self.page.close().await {
            debug!("Tab close failed: {}", e);
        }
    }
}

fn cdp(e: impl std::fmt::Display) -> SessionError {
    SessionError::Browser(e.to_string())
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        debug!("Navigating to {}", url);
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Navigation(e.to_string())),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SessionError::NotFound(selector.to_string()));
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), SessionError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::NotFound(selector.to_string()))?;
        element.click().await.map_err(cdp)?;
        element.type_str(value).await.map_err(cdp)?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::NotFound(selector.to_string()))?;
        element.click().await.map_err(cdp)?;
        Ok(())
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        let text = element.inner_text().await.map_err(cdp)?;
        Ok(text.map(|t| t.trim().to_string()))
    }

    async fn read_texts(&self, selector: &str) -> Result<Vec<String>, SessionError> {
        let elements = self.page.find_elements(selector).await.unwrap_or_default();
        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(text) = element.inner_text().await.map_err(cdp)? {
                texts.push(text.trim().to_string());
            }
        }
        Ok(texts)
    }

    async fn set_input_files(&self, selector: &str, path: &Path) -> Result<(), SessionError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::NotFound(selector.to_string()))?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.to_string_lossy().into_owned()])
            .backend_node_id(element.backend_node_id.clone())
            .build()
            .map_err(SessionError::Browser)?;
        self.page.execute(params).await.map_err(cdp)?;
        Ok(())
    }

    async fn scroll_page(&self) -> Result<(), SessionError> {
        self.page
            .evaluate("window.scrollBy(0, window.innerHeight)")
            .await
            .map_err(cdp)?;
        Ok(())
    }

    async fn html(&self) -> Result<String, SessionError> {
        self.page.content().await.map_err(cdp)
    }
}
