//! Scraper driven by a per-domain selector map from the config file

use scraper::{ElementRef, Selector};
use tracing::debug;

use super::generic::{GenericScraper, PageContext};
use super::html::{
    current_price_text, element_text, image_source, normalize_images, parse_price, selector,
};
use crate::config::SiteSelectors;
use crate::error::ExtractionFailure;
use crate::models::{ProductRecord, Variant};
use crate::traits::{FetchedPage, ProductScraper};

/// Compiled form of [`SiteSelectors`]
struct CompiledSelectors {
    title: Option<Selector>,
    description: Option<Selector>,
    price: Option<Selector>,
    sku: Option<Selector>,
    images: Option<Selector>,
    image_attr: Option<String>,
    specs: Option<(Selector, Selector, Selector)>,
    variants: Option<VariantSelectors>,
}

struct VariantSelectors {
    rows: Selector,
    name: Selector,
    value: Selector,
    price: Option<Selector>,
}

fn compile(css: &Option<String>) -> Result<Option<Selector>, ExtractionFailure> {
    css.as_deref().map(selector).transpose()
}

impl CompiledSelectors {
    fn new(cfg: &SiteSelectors) -> Result<Self, ExtractionFailure> {
        let specs = match (compile(&cfg.spec_rows)?, compile(&cfg.spec_key)?, compile(&cfg.spec_value)?) {
            (Some(rows), Some(key), Some(value)) => Some((rows, key, value)),
            _ => None,
        };
        let variants = match (
            compile(&cfg.variant_rows)?,
            compile(&cfg.variant_name)?,
            compile(&cfg.variant_value)?,
        ) {
            (Some(rows), Some(name), Some(value)) => Some(VariantSelectors {
                rows,
                name,
                value,
                price: compile(&cfg.variant_price)?,
            }),
            _ => None,
        };

        Ok(Self {
            title: compile(&cfg.title)?,
            description: compile(&cfg.description)?,
            price: compile(&cfg.price)?,
            sku: compile(&cfg.sku)?,
            images: compile(&cfg.images)?,
            image_attr: cfg.image_attr.clone(),
            specs,
            variants,
        })
    }
}

/// Whether `host` is `domain` or one of its subdomains, ignoring case.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain
        || host
            .strip_suffix(&domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Scraper for one registered domain
pub struct SiteScraper {
    domain: String,
    render: bool,
    selectors: CompiledSelectors,
    generic: GenericScraper,
}

impl SiteScraper {
    pub fn new(domain: &str, cfg: &SiteSelectors) -> Result<Self, ExtractionFailure> {
        Ok(Self {
            domain: domain.to_ascii_lowercase(),
            render: cfg.needs_browser(),
            selectors: CompiledSelectors::new(cfg)?,
            generic: GenericScraper::new(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether `host` is this domain or one of its subdomains.
    pub fn matches(&self, host: &str) -> bool {
        domain_matches(host, &self.domain)
    }

    fn text(ctx: &PageContext, sel: &Option<Selector>) -> Option<String> {
        let sel = sel.as_ref()?;
        ctx.doc
            .select(sel)
            .map(|el| {
                el.value()
                    .attr("content")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(el))
            })
            .find(|t| !t.trim().is_empty())
    }

    fn price(ctx: &PageContext, sel: &Option<Selector>) -> Option<f64> {
        let sel = sel.as_ref()?;
        ctx.doc.select(sel).find_map(|el| match el.value().attr("content") {
            Some(content) => parse_price(content),
            None => parse_price(&current_price_text(el)),
        })
    }

    fn variants(ctx: &PageContext, sels: &VariantSelectors) -> Vec<Variant> {
        let pick = |row: ElementRef<'_>, sel: &Selector| {
            row.select(sel)
                .next()
                .map(|el| {
                    el.value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| element_text(el))
                })
                .filter(|t| !t.is_empty())
        };

        ctx.doc
            .select(&sels.rows)
            .filter_map(|row| {
                let name = pick(row, &sels.name)?;
                let value = pick(row, &sels.value)?;
                let price = sels
                    .price
                    .as_ref()
                    .and_then(|p| pick(row, p))
                    .and_then(|t| parse_price(&t));
                Some(Variant { name, value, price })
            })
            .collect()
    }
}

impl ProductScraper for SiteScraper {
    fn name(&self) -> &str {
        &self.domain
    }

    fn wants_render(&self) -> bool {
        self.render
    }

    fn parse(&self, page: &FetchedPage) -> Result<ProductRecord, ExtractionFailure> {
        let ctx = PageContext::new(page)?;
        let sels = &self.selectors;

        let title = Self::text(&ctx, &sels.title).or_else(|| ctx.title());
        let Some(title) = title else {
            return Err(ExtractionFailure::Parse(format!(
                "title selector matched nothing on {}",
                self.domain
            )));
        };

        let mut record = self.generic.record_with_title(&ctx, &page.url, title);

        if let Some(sel) = &sels.description
            && let Some(el) = ctx.doc.select(sel).next()
        {
            record.description = Some(el.inner_html().trim().to_string());
        }
        if let Some(price) = Self::price(&ctx, &sels.price) {
            record.price = Some(price);
        }
        if let Some(sku) = Self::text(&ctx, &sels.sku) {
            record.sku = Some(sku);
        }
        if let Some(sel) = &sels.images {
            let found = normalize_images(
                &ctx.base,
                ctx.doc
                    .select(sel)
                    .filter_map(|el| image_source(el, sels.image_attr.as_deref())),
            );
            if !found.is_empty() {
                record.images = found;
            }
        }
        if let Some((rows, key, value)) = &sels.specs {
            for row in ctx.doc.select(rows) {
                let k = row.select(key).next().map(element_text);
                let v = row.select(value).next().map(element_text);
                if let (Some(k), Some(v)) = (k, v)
                    && !k.is_empty()
                {
                    record.specifications.insert(k.trim_end_matches(':').to_string(), v);
                }
            }
        }
        if let Some(variant_sels) = &sels.variants {
            record.variants = Self::variants(&ctx, variant_sels);
        }

        debug!(
            "Parsed {} with {} selectors: {} images, {} variants",
            page.url,
            self.domain,
            record.images.len(),
            record.variants.len()
        );
        Ok(record)
    }
}
