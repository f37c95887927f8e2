//! Scraper selection by domain.
//!
//! Each configured `[scrapers."<domain>"]` map becomes a [`SiteScraper`];
//! anything else goes to the [`GenericScraper`]. Selection is a plain match
//! over the registered domains, longest domain first, with an explicit
//! fallback arm.

pub mod generic;
pub mod html;
pub mod site;

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

pub use generic::GenericScraper;
pub use site::SiteScraper;

use crate::config::SiteSelectors;
use crate::error::ExtractionFailure;
use crate::models::ProductRecord;
use crate::traits::{PageFetcher, ProductScraper};

/// The scraper chosen for one URL
pub enum SelectedScraper<'a> {
    Site(&'a SiteScraper),
    Fallback(&'a GenericScraper),
}

impl SelectedScraper<'_> {
    pub fn as_scraper(&self) -> &dyn ProductScraper {
        match self {
            Self::Site(s) => *s,
            Self::Fallback(g) => *g,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

pub struct ScraperRegistry {
    sites: Vec<SiteScraper>,
    fallback: GenericScraper,
    fetcher: Arc<dyn PageFetcher>,
}

impl ScraperRegistry {
    pub fn new<'a, I>(site_configs: I, fetcher: Arc<dyn PageFetcher>) -> Result<Self, ExtractionFailure>
    where
        I: IntoIterator<Item = (&'a String, &'a SiteSelectors)>,
    {
        let mut sites = site_configs
            .into_iter()
            .map(|(domain, cfg)| SiteScraper::new(domain, cfg))
            .collect::<Result<Vec<_>, _>>()?;
        // Most specific domain wins when several match.
        sites.sort_by(|a, b| b.domain().len().cmp(&a.domain().len()));

        info!("Scraper registry: {} site scrapers plus generic fallback", sites.len());
        Ok(Self {
            sites,
            fallback: GenericScraper::new(),
            fetcher,
        })
    }

    pub fn select(&self, url: &Url) -> SelectedScraper<'_> {
        let host = url.host_str().unwrap_or_default();
        match self.sites.iter().find(|s| s.matches(host)) {
            Some(site) => SelectedScraper::Site(site),
            None => SelectedScraper::Fallback(&self.fallback),
        }
    }

    /// Fetch and parse one product URL.
    pub async fn extract(&self, url: &str) -> Result<ProductRecord, ExtractionFailure> {
        let parsed = Url::parse(url.trim()).map_err(|e| ExtractionFailure::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ExtractionFailure::InvalidUrl(format!("{url}: not an http(s) url")));
        }

        let selected = self.select(&parsed);
        let scraper = selected.as_scraper();
        debug!("Using {} scraper for {}", scraper.name(), parsed);

        let result = scraper.extract(parsed.as_str(), self.fetcher.as_ref()).await;
        if let Err(e) = &result {
            warn!("Extraction failed for {}: {}", parsed, e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use async_trait::async_trait;

    use super::*;
    use crate::models::FetchMethod;
    use crate::traits::FetchedPage;

    struct CannedFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, ExtractionFailure> {
            self.pages
                .get(url)
                .map(|html| FetchedPage {
                    url: url.to_string(),
                    html: html.clone(),
                    method: FetchMethod::Http,
                })
                .ok_or_else(|| ExtractionFailure::Network("connection refused".to_string()))
        }

        async fn render(&self, url: &str) -> Result<FetchedPage, ExtractionFailure> {
            let mut page = self.fetch(url).await?;
            page.method = FetchMethod::Browser;
            Ok(page)
        }
    }

    fn registry(pages: &[(&str, &str)]) -> ScraperRegistry {
        let mut sites = BTreeMap::new();
        sites.insert(
            "shop.example.com".to_string(),
            SiteSelectors {
                title: Some(".name".to_string()),
                render: true,
                ..SiteSelectors::default()
            },
        );
        sites.insert(
            "example.com".to_string(),
            SiteSelectors {
                title: Some(".other".to_string()),
                ..SiteSelectors::default()
            },
        );
        let fetcher = CannedFetcher {
            pages: pages
                .iter()
                .map(|(u, h)| (u.to_string(), h.to_string()))
                .collect(),
        };
        ScraperRegistry::new(&sites, Arc::new(fetcher)).unwrap()
    }

    #[test]
    fn most_specific_domain_is_selected() {
        let reg = registry(&[]);
        let pick = |u: &str| match reg.select(&Url::parse(u).unwrap()) {
            SelectedScraper::Site(s) => s.domain().to_string(),
            SelectedScraper::Fallback(_) => "generic".to_string(),
        };
        assert_eq!(pick("https://www.shop.example.com/p/1"), "shop.example.com");
        assert_eq!(pick("https://blog.example.com/x"), "example.com");
        assert_eq!(pick("https://elsewhere.ro/p"), "generic");
    }

    #[tokio::test]
    async fn site_scraper_renders_when_configured() {
        let reg = registry(&[(
            "https://shop.example.com/p/1",
            r#"<html><body><div class="name">Termos</div></body></html>"#,
        )]);
        let record = reg.extract("https://shop.example.com/p/1").await.unwrap();
        assert_eq!(record.title.as_deref(), Some("Termos"));
        assert_eq!(record.fetched_with, FetchMethod::Browser);
    }

    #[tokio::test]
    async fn unknown_domain_uses_fallback_without_panicking() {
        let reg = registry(&[
            (
                "https://elsewhere.ro/p/ok",
                "<html><head><title>Umbrela</title></head><body></body></html>",
            ),
            ("https://elsewhere.ro/p/empty", "<html><body></body></html>"),
        ]);
        let ok = reg.extract("https://elsewhere.ro/p/ok").await.unwrap();
        assert_eq!(ok.title.as_deref(), Some("Umbrela"));

        let empty = reg.extract("https://elsewhere.ro/p/empty").await;
        assert!(matches!(empty, Err(ExtractionFailure::Parse(_))));

        let offline = reg.extract("https://elsewhere.ro/p/missing").await;
        assert!(matches!(offline, Err(ExtractionFailure::Network(_))));
    }

    #[tokio::test]
    async fn bad_urls_are_row_failures() {
        let reg = registry(&[]);
        assert!(matches!(
            reg.extract("not a url").await,
            Err(ExtractionFailure::InvalidUrl(_))
        ));
        assert!(matches!(
            reg.extract("ftp://shop.example.com/p").await,
            Err(ExtractionFailure::InvalidUrl(_))
        ));
    }
}
