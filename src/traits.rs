//! Traits and interfaces for site-agnostic product scraping

use async_trait::async_trait;

use crate::error::ExtractionFailure;
use crate::models::{FetchMethod, ProductRecord};

/// A product page as fetched, before parsing
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL, used to resolve relative links
    pub url: String,
    pub html: String,
    pub method: FetchMethod,
}

/// Source of page HTML.
///
/// Kept behind a trait so scrapers can be exercised against canned pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Plain fetch; may fall back to the browser when the page looks blocked.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ExtractionFailure>;

    /// Always fetch through the headless browser.
    async fn render(&self, url: &str) -> Result<FetchedPage, ExtractionFailure>;
}

/// Trait for site-specific and generic scrapers
#[async_trait]
pub trait ProductScraper: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether pages must be rendered by the browser before parsing
    fn wants_render(&self) -> bool {
        false
    }

    /// Turn fetched HTML into a product record
    ///
    /// # Returns
    /// * `Result<ProductRecord, ExtractionFailure>` - The record, or why the page could not be parsed
    fn parse(&self, page: &FetchedPage) -> Result<ProductRecord, ExtractionFailure>;

    /// Fetch `url` and parse it
    async fn extract(
        &self,
        url: &str,
        fetcher: &dyn PageFetcher,
    ) -> Result<ProductRecord, ExtractionFailure> {
        let page = if self.wants_render() {
            fetcher.render(url).await?
        } else {
            fetcher.fetch(url).await?
        };
        let mut record = self.parse(&page)?;
        record.source_url = url.to_string();
        record.fetched_with = page.method;
        Ok(record)
    }
}
