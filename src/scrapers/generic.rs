//! Heuristic scraper used for any domain without a configured selector map.
//!
//! Field sources, best first: schema.org JSON-LD, OpenGraph/meta tags, common
//! product markup, then free-text patterns.

use std::collections::BTreeMap;

use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use super::html::{
    clean_text, current_price_text, element_text, find_product_jsonld, first_text, image_source,
    jsonld_images, jsonld_price, jsonld_str, meta_content, normalize_images, page_language,
    parse_price, price_in_text, specs_from_tables,
};
use crate::error::ExtractionFailure;
use crate::models::ProductRecord;
use crate::traits::{FetchedPage, ProductScraper};

const DESCRIPTION_CONTAINERS: &[&str] = &[
    r#"[itemprop="description"]"#,
    ".product-description",
    ".product__description",
    ".description",
    "#description",
    ".tab-content",
];

const SKU_SELECTORS: &[&str] = &[r#"[itemprop="sku"]"#, ".sku", ".product-sku", "#sku"];

/// A parsed page plus the pieces every field extractor needs
pub struct PageContext {
    pub doc: Html,
    pub base: Url,
    jsonld: Option<Value>,
}

impl PageContext {
    pub fn new(page: &FetchedPage) -> Result<Self, ExtractionFailure> {
        let base = Url::parse(&page.url).map_err(|e| ExtractionFailure::InvalidUrl(e.to_string()))?;
        let doc = Html::parse_document(&page.html);
        let jsonld = find_product_jsonld(&doc);
        Ok(Self { doc, base, jsonld })
    }

    pub fn domain(&self) -> String {
        self.base.host_str().unwrap_or_default().to_ascii_lowercase()
    }

    fn first_of(&self, selectors: &[&str]) -> Option<String> {
        selectors.iter().find_map(|css| {
            let sel = Selector::parse(css).ok()?;
            first_text(&self.doc, &sel)
        })
    }

    pub fn title(&self) -> Option<String> {
        self.jsonld
            .as_ref()
            .and_then(|p| jsonld_str(p, "name"))
            .or_else(|| {
                meta_content(
                    &self.doc,
                    &[r#"meta[property="og:title"]"#, r#"meta[name="twitter:title"]"#],
                )
            })
            .or_else(|| self.first_of(&["h1", "title"]))
    }

    pub fn description(&self) -> Option<String> {
        if let Some(d) = self.jsonld.as_ref().and_then(|p| jsonld_str(p, "description")) {
            return Some(format!("<p>{d}</p>"));
        }

        let meta = meta_content(
            &self.doc,
            &[
                r#"meta[property="og:description"]"#,
                r#"meta[name="description"]"#,
                r#"meta[name="twitter:description"]"#,
            ],
        );
        if let Some(d) = meta.filter(|d| d.len() > 40) {
            return Some(format!("<p>{d}</p>"));
        }

        for css in DESCRIPTION_CONTAINERS {
            let Ok(sel) = Selector::parse(css) else {
                continue;
            };
            if let Some(el) = self.doc.select(&sel).find(|el| element_text(*el).len() > 50) {
                return Some(el.inner_html().trim().to_string());
            }
        }

        let paragraphs = Selector::parse("p").ok()?;
        self.doc
            .select(&paragraphs)
            .map(element_text)
            .filter(|t| t.len() > 80)
            .max_by_key(String::len)
            .map(|t| format!("<p>{t}</p>"))
    }

    pub fn images(&self) -> Vec<String> {
        let mut candidates: Vec<String> = self.jsonld.as_ref().map(jsonld_images).unwrap_or_default();
        if let Some(og) = meta_content(&self.doc, &[r#"meta[property="og:image"]"#]) {
            candidates.push(og);
        }
        if candidates.is_empty()
            && let Ok(img) = Selector::parse("img")
        {
            candidates.extend(self.doc.select(&img).filter_map(|el| image_source(el, None)));
        }
        normalize_images(&self.base, candidates)
    }

    pub fn sku(&self) -> Option<String> {
        if let Some(sku) = self.jsonld.as_ref().and_then(|p| jsonld_str(p, "sku")) {
            return Some(sku);
        }
        SKU_SELECTORS.iter().find_map(|css| {
            let sel = Selector::parse(css).ok()?;
            self.doc.select(&sel).find_map(|el| {
                let text = el
                    .value()
                    .attr("content")
                    .map(clean_text)
                    .unwrap_or_else(|| element_text(el));
                Some(text).filter(|t| !t.is_empty())
            })
        })
    }

    pub fn price(&self) -> Option<f64> {
        if let Some(price) = self.jsonld.as_ref().and_then(jsonld_price) {
            return Some(price);
        }
        if let Some(price) = meta_content(
            &self.doc,
            &[
                r#"meta[property="product:price:amount"]"#,
                r#"[itemprop="price"]"#,
            ],
        )
        .and_then(|c| parse_price(&c))
        {
            return Some(price);
        }
        if let Ok(sel) = Selector::parse(r#"[itemprop="price"], .price"#)
            && let Some(price) = self
                .doc
                .select(&sel)
                .find_map(|el| parse_price(&current_price_text(el)))
        {
            return Some(price);
        }
        let body = Selector::parse("body").ok()?;
        let text = self.doc.select(&body).next().map(element_text)?;
        price_in_text(&text)
    }

    pub fn specifications(&self) -> BTreeMap<String, String> {
        specs_from_tables(&self.doc)
    }

    pub fn language(&self) -> Option<String> {
        page_language(&self.doc)
    }
}

/// Fallback scraper for unregistered domains
#[derive(Debug, Clone, Default)]
pub struct GenericScraper;

impl GenericScraper {
    pub fn new() -> Self {
        Self
    }

    /// Build a record from heuristics alone; fails only when no title exists.
    pub fn record_from(&self, ctx: &PageContext, source_url: &str) -> Result<ProductRecord, ExtractionFailure> {
        let title = ctx
            .title()
            .ok_or_else(|| ExtractionFailure::Parse("no product title found".to_string()))?;
        Ok(self.record_with_title(ctx, source_url, title))
    }

    pub fn record_with_title(&self, ctx: &PageContext, source_url: &str, title: String) -> ProductRecord {
        ProductRecord {
            source_url: source_url.to_string(),
            domain: ctx.domain(),
            title: Some(title),
            description: ctx.description(),
            specifications: ctx.specifications(),
            images: ctx.images(),
            sku: ctx.sku(),
            price: ctx.price(),
            variants: Vec::new(),
            language: ctx.language(),
            fetched_with: Default::default(),
        }
    }
}

impl ProductScraper for GenericScraper {
    fn name(&self) -> &str {
        "generic"
    }

    fn parse(&self, page: &FetchedPage) -> Result<ProductRecord, ExtractionFailure> {
        let ctx = PageContext::new(page)?;
        self.record_from(&ctx, &page.url)
    }
}
