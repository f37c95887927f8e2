//! Page fetching: plain HTTP with one bounded retry, and a headless browser
//! fallback for pages that come back blocked. Supplier sites that only show
//! prices to logged-in users are logged into once per browser.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{BrowserSession, ChromeBrowser, ChromeSession, SessionError};
use crate::config::{BrowserSettings, HttpConfig, SiteCredentials, SiteLogin, SiteSelectors};
use crate::error::ExtractionFailure;
use crate::models::FetchMethod;
use crate::scrapers::site::domain_matches;
use crate::traits::{FetchedPage, PageFetcher};

/// Bodies shorter than this are challenge or error pages, not products.
const MIN_PRODUCT_PAGE_LEN: usize = 1500;
/// Block markers are only trusted on small pages; real product pages often
/// mention "captcha" in a newsletter widget.
const MARKER_SCAN_MAX_LEN: usize = 50_000;
const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "access denied",
    "attention required",
    "enable javascript",
    "cf-browser-verification",
];
/// Time given to client-side rendering after navigation.
const RENDER_SETTLE: Duration = Duration::from_millis(1500);
/// How long a cookie banner gets to show up.
const COOKIE_WAIT: Duration = Duration::from_secs(3);
const SCROLL_PAUSE: Duration = Duration::from_millis(300);

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504 | 520..=524)
}

/// Why a successfully downloaded page should be treated as blocked.
pub fn detect_block(html: &str) -> Option<String> {
    if html.len() < MIN_PRODUCT_PAGE_LEN {
        return Some(format!("page too short ({} bytes)", html.len()));
    }
    if html.len() <= MARKER_SCAN_MAX_LEN {
        let lower = html.to_lowercase();
        if let Some(marker) = BLOCK_MARKERS.iter().find(|m| lower.contains(**m)) {
            return Some(format!("page contains \"{marker}\""));
        }
    }
    None
}

/// Renders a page in a real browser.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<FetchedPage, ExtractionFailure>;

    /// Release the browser, if one was started.
    async fn shutdown(&self) {}
}

/// Click the cookie banner button when it shows up. A missing or stuck
/// banner is not an error.
async fn accept_cookies<S: BrowserSession>(session: &S, selector: Option<&str>) {
    let Some(selector) = selector else {
        return;
    };
    match session.wait_for(selector, COOKIE_WAIT).await {
        Ok(()) => {
            if let Err(e) = session.click(selector).await {
                debug!("Cookie banner click failed: {}", e);
            }
        }
        Err(_) => debug!("No cookie banner matching {}", selector),
    }
}

/// Fill and submit a supplier login form.
pub async fn log_in<S: BrowserSession>(
    session: &S,
    site: &SiteSelectors,
    login: &SiteLogin,
    credentials: &SiteCredentials,
    timeout: Duration,
) -> Result<(), SessionError> {
    session.navigate(&login.url).await?;
    accept_cookies(session, site.cookie_accept.as_deref()).await;
    session.wait_for(&login.username, timeout).await?;
    session.fill(&login.username, &credentials.username).await?;
    session.fill(&login.password, &credentials.password).await?;
    session.click(&login.submit).await?;
    if let Some(marker) = &login.logged_in {
        session.wait_for(marker, timeout).await?;
    }
    Ok(())
}

/// Dismiss the cookie banner and scroll so lazy images load.
pub async fn prepare_page<S: BrowserSession>(session: &S, site: &SiteSelectors) -> Result<(), SessionError> {
    accept_cookies(session, site.cookie_accept.as_deref()).await;
    for _ in 0..site.scroll_steps {
        session.scroll_page().await?;
        tokio::time::sleep(SCROLL_PAUSE).await;
    }
    Ok(())
}

fn render_error(e: SessionError) -> ExtractionFailure {
    ExtractionFailure::Network(format!("render: {e}"))
}

/// Lazily launched browser used to render blocked pages and sites that need
/// a browser
pub struct BrowserRenderer {
    settings: BrowserSettings,
    navigation_timeout: Duration,
    element_timeout: Duration,
    settle: Duration,
    /// Sites with browser steps, longest domain first
    sites: Vec<(String, SiteSelectors)>,
    browser: Mutex<Option<ChromeBrowser>>,
    logged_in: Mutex<HashSet<String>>,
}

impl BrowserRenderer {
    pub fn new(
        settings: BrowserSettings,
        navigation_timeout: Duration,
        element_timeout: Duration,
        sites: &BTreeMap<String, SiteSelectors>,
    ) -> Self {
        let mut sites: Vec<(String, SiteSelectors)> = sites
            .iter()
            .filter(|(_, s)| s.login.is_some() || s.cookie_accept.is_some() || s.scroll_steps > 0)
            .map(|(domain, s)| (domain.to_ascii_lowercase(), s.clone()))
            .collect();
        sites.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            settings,
            navigation_timeout,
            element_timeout,
            settle: RENDER_SETTLE,
            sites,
            browser: Mutex::new(None),
            logged_in: Mutex::new(HashSet::new()),
        }
    }

    fn site_for(&self, url: &str) -> Option<(&str, &SiteSelectors)> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        self.sites
            .iter()
            .find(|(domain, _)| domain_matches(host, domain))
            .map(|(domain, site)| (domain.as_str(), site))
    }

    async fn session(&self) -> Result<ChromeSession, ExtractionFailure> {
        let mut slot = self.browser.lock().await;
        if slot.is_none() {
            let launched = ChromeBrowser::launch(&self.settings, self.navigation_timeout)
                .await
                .map_err(|e| ExtractionFailure::Network(format!("browser launch: {e}")))?;
            *slot = Some(launched);
        }
        let Some(browser) = slot.as_ref() else {
            return Err(ExtractionFailure::Network("browser unavailable".to_string()));
        };
        browser
            .new_session()
            .await
            .map_err(|e| ExtractionFailure::Network(e.to_string()))
    }

    /// Log in if the site needs it, then load `url` and return its HTML.
    async fn render_in<S: BrowserSession>(&self, session: &S, url: &str) -> Result<String, ExtractionFailure> {
        let site = self.site_for(url);

        if let Some((domain, cfg)) = site
            && let Some(login) = &cfg.login
        {
            let mut logged_in = self.logged_in.lock().await;
            if !logged_in.contains(domain) {
                let credentials = login
                    .credentials()
                    .map_err(|e| ExtractionFailure::Blocked(format!("login to {domain}: {e}")))?;
                info!("Logging into {}", domain);
                log_in(session, cfg, login, &credentials, self.element_timeout)
                    .await
                    .map_err(|e| ExtractionFailure::Blocked(format!("login to {domain} failed: {e}")))?;
                logged_in.insert(domain.to_string());
            }
        }

        session.navigate(url).await.map_err(render_error)?;
        tokio::time::sleep(self.settle).await;
        if let Some((_, cfg)) = site {
            prepare_page(session, cfg).await.map_err(render_error)?;
        }
        session.html().await.map_err(render_error)
    }
}

#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn render(&self, url: &str) -> Result<FetchedPage, ExtractionFailure> {
        let session = self.session().await?;
        let result = self.render_in(&session, url).await;
        session.close().await;

        Ok(FetchedPage {
            url: url.to_string(),
            html: result?,
            method: FetchMethod::Browser,
        })
    }

    async fn shutdown(&self) {
        if let Some(browser) = self.browser.lock().await.take() {
            browser.close().await;
        }
    }
}

/// HTTP fetcher with bounded retry and optional browser fallback
pub struct HttpFetcher {
    client: Client,
    retries: u32,
    retry_delay: Duration,
    renderer: Option<Arc<dyn PageRenderer>>,
    /// Re-render blocked pages with `renderer`
    render_fallback: bool,
}

impl HttpFetcher {
    pub fn new(
        http: &HttpConfig,
        renderer: Option<Arc<dyn PageRenderer>>,
        render_fallback: bool,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_str(&http.accept_language)?);

        let client = Client::builder()
            .user_agent(http.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            retries: http.retries,
            retry_delay: Duration::from_millis(http.retry_delay_ms),
            renderer,
            render_fallback,
        })
    }

    pub async fn shutdown(&self) {
        if let Some(renderer) = &self.renderer {
            renderer.shutdown().await;
        }
    }

    /// GET with up to `retries` extra attempts on network errors and
    /// transient statuses.
    async fn get_with_retries(&self, url: &str) -> Result<(StatusCode, String), ExtractionFailure> {
        let mut attempt = 0;
        loop {
            let outcome = match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    match response.text().await {
                        Ok(body) => Ok((status, body)),
                        Err(e) => Err(ExtractionFailure::Network(e.to_string())),
                    }
                }
                Err(e) => Err(ExtractionFailure::Network(e.to_string())),
            };

            let retry = match &outcome {
                Ok((status, _)) => is_retryable(*status),
                Err(_) => true,
            };
            if !retry || attempt >= self.retries {
                return outcome;
            }

            attempt += 1;
            warn!("Fetch of {} failed, retry {}/{}", url, attempt, self.retries);
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn fetch_http(&self, url: &str) -> Result<FetchedPage, ExtractionFailure> {
        let (status, html) = self.get_with_retries(url).await?;

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExtractionFailure::Blocked(format!("http {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(ExtractionFailure::HttpStatus(status.as_u16()));
        }
        if let Some(reason) = detect_block(&html) {
            return Err(ExtractionFailure::Blocked(reason));
        }

        Ok(FetchedPage {
            url: url.to_string(),
            html,
            method: FetchMethod::Http,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ExtractionFailure> {
        match self.fetch_http(url).await {
            Err(ExtractionFailure::Blocked(reason)) => {
                let Some(renderer) = self.renderer.as_ref().filter(|_| self.render_fallback) else {
                    return Err(ExtractionFailure::Blocked(reason));
                };
                info!("{} looks blocked ({}), rendering in browser", url, reason);
                let page = renderer.render(url).await.map_err(|e| {
                    ExtractionFailure::Blocked(format!("{reason}; browser fallback failed: {e}"))
                })?;
                match detect_block(&page.html) {
                    Some(still) => Err(ExtractionFailure::Blocked(format!("{still} (browser)"))),
                    None => Ok(page),
                }
            }
            other => other,
        }
    }

    async fn render(&self, url: &str) -> Result<FetchedPage, ExtractionFailure> {
        match &self.renderer {
            Some(renderer) => renderer.render(url).await,
            None => {
                debug!("Browser disabled, fetching {} over HTTP", url);
                self.fetch_http(url).await
            }
        }
    }
}
