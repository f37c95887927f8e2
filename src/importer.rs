use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::automation::{AutomationDriver, ImportReport};
use crate::browser::{ChromeBrowser, ChromeSession};
use crate::config::{AdminCredentials, AppConfig};
use crate::error::{ExportError, ExtractionFailure, FatalInputError};
use crate::export::{ExportSummary, export_rows};
use crate::fetch::{BrowserRenderer, HttpFetcher};
use crate::models::{ReviewRow, SourceRow};
use crate::review::{ReviewTable, build_row};
use crate::scrapers::ScraperRegistry;
use crate::spreadsheet::read_source_rows;
use crate::traits::PageFetcher;

/// Runs the pipeline stages against one config
pub struct Importer {
    config: AppConfig,
    registry: ScraperRegistry,
    http: Option<Arc<HttpFetcher>>,
}

impl Importer {
    pub fn new(config: AppConfig) -> Result<Self> {
        let renderer = BrowserRenderer::new(
            config.browser.clone(),
            Duration::from_secs(config.admin.navigation_timeout_secs),
            Duration::from_secs(config.admin.element_timeout_secs),
            &config.scrapers,
        );
        let http = Arc::new(HttpFetcher::new(
            &config.http,
            Some(Arc::new(renderer)),
            config.browser.render_fallback,
        )?);

        let mut importer = Self::with_fetcher(config, http.clone())?;
        importer.http = Some(http);
        Ok(importer)
    }

    /// Build on an arbitrary page source.
    pub fn with_fetcher(config: AppConfig, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        let registry = ScraperRegistry::new(&config.scrapers, fetcher)
            .context("building site scrapers from config")?;
        Ok(Self {
            config,
            registry,
            http: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Scrape every row, keeping spreadsheet order.
    ///
    /// Once `cancel` is set, rows not yet started are recorded as cancelled
    /// instead of fetched.
    pub async fn scrape_rows(
        &self,
        rows: &[SourceRow],
        cancel: &AtomicBool,
        progress: Option<&ProgressBar>,
    ) -> ReviewTable {
        let concurrency = self.config.http.concurrency.max(1);
        info!("Scraping {} rows ({} at a time)", rows.len(), concurrency);

        let reviewed: Vec<ReviewRow> = stream::iter(rows)
            .map(|row| async move {
                let result = if cancel.load(Ordering::Relaxed) {
                    Err(ExtractionFailure::Cancelled)
                } else {
                    self.registry.extract(&row.url).await
                };
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                build_row(
                    row,
                    result,
                    &self.config.pricing,
                    &self.config.export,
                )
            })
            .buffered(concurrency)
            .collect()
            .await;

        let table = ReviewTable::from_rows(reviewed);
        let (ok, review, excluded) = table.status_counts();
        info!(
            "Scraped {} rows: {} ok, {} need review, {} excluded",
            table.len(),
            ok,
            review,
            excluded
        );
        table
    }

    pub async fn scrape_file(
        &self,
        input: &Path,
        cancel: &AtomicBool,
        progress: Option<&ProgressBar>,
    ) -> Result<ReviewTable, FatalInputError> {
        let rows = read_source_rows(input)?;
        if let Some(pb) = progress {
            pb.set_length(rows.len() as u64);
        }
        Ok(self.scrape_rows(&rows, cancel, progress).await)
    }

    /// Write the approved rows and mark the ones that could not be exported.
    pub fn export(&self, table: &mut ReviewTable, output: &Path) -> Result<ExportSummary> {
        let rows = table.exportable(self.config.review.approval);
        if rows.is_empty() {
            warn!("No approved rows to export");
        }
        let summary = export_rows(&rows, &self.config.pricing, &self.config.export, output)?;

        for err in &summary.excluded {
            let ExportError::MissingField { index, .. } = err;
            table.mark_excluded(*index, err.to_string())?;
        }
        Ok(summary)
    }

    async fn open_admin(
        &self,
        credentials: AdminCredentials,
    ) -> Result<(ChromeBrowser, AutomationDriver<ChromeSession>)> {
        let browser = ChromeBrowser::launch(
            &self.config.browser,
            Duration::from_secs(self.config.admin.navigation_timeout_secs),
        )
        .await
        .context("launching browser")?;
        let session = match browser.new_session().await {
            Ok(session) => session,
            Err(e) => {
                browser.close().await;
                return Err(e).context("opening browser tab");
            }
        };

        let driver = AutomationDriver::new(
            session,
            credentials,
            self.config.admin.clone(),
            self.config.selectors.clone(),
        )
        .with_debug_artifacts(&self.config.browser.debug_artifacts_dir);
        Ok((browser, driver))
    }

    async fn close_admin(browser: ChromeBrowser, driver: AutomationDriver<ChromeSession>) {
        driver.into_session().close().await;
        browser.close().await;
    }

    /// Log in and read the admin category list.
    pub async fn fetch_categories(&self, credentials: AdminCredentials) -> Result<Vec<String>> {
        let (browser, mut driver) = self.open_admin(credentials).await?;
        let result = async {
            driver.login().await?;
            driver.list_categories().await
        }
        .await;
        Self::close_admin(browser, driver).await;
        Ok(result?)
    }

    /// Upload an exported file and start the import. The file is left in
    /// place whatever happens, for a manual upload.
    pub async fn upload(&self, credentials: AdminCredentials, file: &Path) -> Result<ImportReport> {
        let (browser, mut driver) = self.open_admin(credentials).await?;
        let result = driver.upload_and_import(file).await;
        Self::close_admin(browser, driver).await;
        Ok(result?)
    }

    /// Close the render browser if one was started.
    pub async fn shutdown(self) {
        if let Some(http) = &self.http {
            http.shutdown().await;
        }
    }
}
