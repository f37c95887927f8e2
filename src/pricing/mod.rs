//! Fixed business rules applied to every scraped product: doubled price with
//! a unit default, stock of one, always active, and a SKU that falls back to
//! one generated from the product URL.

use url::Url;

use crate::config::{ExportConfig, PricingConfig};
use crate::error::TransformWarning;
use crate::models::ProductRecord;

pub const FIXED_STOCK: u32 = 1;
const GENERATED_SKU_MAX_LEN: usize = 64;
const SKU_HASH_LEN: usize = 8;

/// Review fields derived from a record. Pure and idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub sku: String,
    pub final_price: f64,
    pub stock: u32,
    pub active: bool,
    pub needs_translation: bool,
    pub warnings: Vec<TransformWarning>,
}

pub fn derive(record: &ProductRecord, pricing: &PricingConfig, export: &ExportConfig) -> Derived {
    let mut warnings = Vec::new();

    if !matches!(record.price, Some(p) if p > 0.0) {
        warnings.push(TransformWarning::DefaultPrice);
    }
    let site_sku = record
        .sku
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if site_sku.is_none() {
        warnings.push(TransformWarning::GeneratedSku);
    }

    Derived {
        sku: ensure_sku(&record.source_url, site_sku, export.sku_max_len),
        final_price: final_price(record.price, pricing),
        stock: FIXED_STOCK,
        active: true,
        needs_translation: needs_translation(record.language.as_deref(), &export.language),
        warnings,
    }
}

/// `price * multiplier` for a positive price, the default price otherwise.
pub fn final_price(price: Option<f64>, pricing: &PricingConfig) -> f64 {
    match price {
        Some(p) if p > 0.0 && p.is_finite() => round2(p * pricing.multiplier),
        _ => pricing.default_price,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A page whose declared language is not the store language needs
/// translating. Unknown language is not flagged.
pub fn needs_translation(page_language: Option<&str>, store_language: &str) -> bool {
    let Some(lang) = page_language.map(str::trim).filter(|l| !l.is_empty()) else {
        return false;
    };
    let primary = lang.split(['-', '_']).next().unwrap_or(lang);
    !primary.eq_ignore_ascii_case(store_language)
}

/// The site SKU when present, else one generated from the URL, already cut
/// to the length the store accepts.
pub fn ensure_sku(url: &str, site_sku: Option<&str>, max_len: usize) -> String {
    match site_sku.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sku) => shorten_sku(sku, max_len),
        None => shorten_sku(&sku_from_url(url), max_len),
    }
}

/// Gomag rejects SKUs over `max_len`; longer ones keep a prefix plus a short
/// md5 so they stay unique and stable. Idempotent.
pub fn shorten_sku(sku: &str, max_len: usize) -> String {
    let sku = sku.trim();
    if sku.chars().count() <= max_len {
        return sku.to_string();
    }
    let hash = format!("{:x}", md5::compute(sku.as_bytes()));
    let prefix_len = max_len.saturating_sub(SKU_HASH_LEN + 1);
    let prefix: String = sku.chars().take(prefix_len).collect();
    format!("{}-{}", prefix.trim_end_matches('-'), &hash[..SKU_HASH_LEN])
}

/// Deterministic SKU: slug of the host and the last path segment, e.g.
/// `https://www.shop.ro/p/cana-alba` becomes `www-shop-ro-cana-alba`.
pub fn sku_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return format!("sku-{}", &format!("{:x}", md5::compute(url.trim()))[..12]);
    };

    let host = parsed.host_str().unwrap_or_default();
    let tail = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .unwrap_or_else(|| "produs".to_string());

    let mut slug = slugify(&format!("{host}-{tail}"));
    if slug.len() > GENERATED_SKU_MAX_LEN {
        slug.truncate(GENERATED_SKU_MAX_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }
    slug
}

fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dash = false;

    for ch in text.chars().flat_map(char::to_lowercase) {
        let mapped = match ch {
            'ă' | 'â' | 'á' | 'à' | 'ä' => Some('a'),
            'î' | 'í' => Some('i'),
            'ș' | 'ş' => Some('s'),
            'ț' | 'ţ' => Some('t'),
            'é' | 'è' | 'ë' => Some('e'),
            'ö' | 'ó' => Some('o'),
            'ü' | 'ú' => Some('u'),
            c if c.is_ascii_alphanumeric() => Some(c),
            _ => None,
        };
        match mapped {
            Some(c) => {
                out.push(c);
                dash = false;
            }
            None if !dash && !out.is_empty() => {
                out.push('-');
                dash = true;
            }
            None => {}
        }
    }

    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductRecord;

    fn record(price: Option<f64>, sku: Option<&str>) -> ProductRecord {
        ProductRecord {
            source_url: "https://shop.example.com/p/1".to_string(),
            domain: "shop.example.com".to_string(),
            title: Some("Mug".to_string()),
            price,
            sku: sku.map(str::to_string),
            ..ProductRecord::default()
        }
    }

    #[test]
    fn price_is_doubled_or_defaults_to_one() {
        let pricing = PricingConfig::default();
        assert_eq!(final_price(Some(20.0), &pricing), 40.0);
        assert_eq!(final_price(Some(12.345), &pricing), 24.69);
        assert_eq!(final_price(None, &pricing), 1.0);
        assert_eq!(final_price(Some(0.0), &pricing), 1.0);
        assert_eq!(final_price(Some(-3.0), &pricing), 1.0);
    }

    #[test]
    fn derived_fields_are_fixed_and_idempotent() {
        let pricing = PricingConfig::default();
        let rec = record(Some(50.0), None);

        let first = derive(&rec, &pricing, &ExportConfig::default());
        let second = derive(&rec, &pricing, &ExportConfig::default());
        assert_eq!(first, second);
        assert_eq!(first.final_price, 100.0);
        assert_eq!(first.stock, 1);
        assert!(first.active);
        assert_eq!(first.warnings, vec![TransformWarning::GeneratedSku]);
    }

    #[test]
    fn site_sku_wins_over_generated() {
        let derived = derive(
            &record(None, Some("  AB-12 ")),
            &PricingConfig::default(),
            &ExportConfig::default(),
        );
        assert_eq!(derived.sku, "AB-12");
        assert_eq!(derived.warnings, vec![TransformWarning::DefaultPrice]);
    }

    #[test]
    fn generated_sku_is_stable_per_url() {
        let url = "https://www.Shop.ro/produse/Cană-Albă%20XL/";
        assert_eq!(sku_from_url(url), sku_from_url(url));
        assert_eq!(sku_from_url(url), "www-shop-ro-cana-alba-xl");
        assert_ne!(
            sku_from_url("https://shop.ro/p/1"),
            sku_from_url("https://shop.ro/p/2")
        );
        assert_eq!(sku_from_url("https://shop.ro/"), "shop-ro-produs");
        assert!(sku_from_url("not a url").starts_with("sku-"));
    }

    #[test]
    fn generated_sku_is_capped() {
        let url = format!("https://shop.ro/p/{}", "x".repeat(200));
        assert!(sku_from_url(&url).len() <= GENERATED_SKU_MAX_LEN);
    }

    #[test]
    fn long_skus_are_shortened_deterministically() {
        assert_eq!(shorten_sku(" AB-12 ", 30), "AB-12");
        let long = "www-shop-example-com-cana-ceramica-alba-350ml";
        let short = shorten_sku(long, 30);
        assert!(short.chars().count() <= 30);
        assert_eq!(short, shorten_sku(long, 30));
        assert_eq!(shorten_sku(&short, 30), short);
        assert!(short.starts_with("www-shop-example-com-"));
        assert_ne!(short, shorten_sku("www-shop-example-com-cana-ceramica-alba-500ml", 30));
    }

    #[test]
    fn derived_sku_fits_the_store_limit() {
        let rec = ProductRecord {
            source_url: "https://shop.example.com/p/cana-ceramica-alba".to_string(),
            ..record(Some(10.0), None)
        };
        let export = ExportConfig::default();
        let derived = derive(&rec, &PricingConfig::default(), &export);
        assert!(derived.sku.chars().count() <= export.sku_max_len);
        assert!(derived.sku.starts_with("shop-example-com-cana"));

        let site = record(Some(10.0), Some("FURNIZOR-COD-FOARTE-LUNG-0000000000123"));
        let derived = derive(&site, &PricingConfig::default(), &export);
        assert!(derived.sku.chars().count() <= export.sku_max_len);
    }

    #[test]
    fn translation_flag_follows_page_language() {
        assert!(!needs_translation(Some("ro-RO"), "ro"));
        assert!(needs_translation(Some("en-GB"), "ro"));
        assert!(needs_translation(Some("de"), "ro"));
        assert!(!needs_translation(None, "ro"));
        assert!(!needs_translation(Some(" "), "ro"));
    }
}
