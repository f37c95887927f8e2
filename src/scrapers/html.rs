//! Shared HTML extraction helpers

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::error::ExtractionFailure;

pub const MAX_IMAGES: usize = 12;

/// One amount: grouped thousands with an optional decimal part, or a plain
/// number with one. Never spans two amounts.
const PRICE_AMOUNT: &str = r"\d{1,3}(?:[., \x{A0}]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?";

static PRICE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PRICE_AMOUNT).expect("valid price regex"));

/// Price followed by a currency, e.g. `1.299,00 lei` or `49.90 EUR`.
static PRICE_WITH_CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({PRICE_AMOUNT})\s*(lei|ron|eur|€)")).expect("valid price regex")
});

/// Currency sign before the amount, e.g. `€ 12.50`.
static CURRENCY_THEN_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"€\s*({PRICE_AMOUNT})")).expect("valid price regex")
});

pub fn selector(css: &str) -> Result<Selector, ExtractionFailure> {
    Selector::parse(css).map_err(|e| ExtractionFailure::Parse(format!("bad selector `{css}`: {e:?}")))
}

/// Collapse runs of whitespace and trim.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// First non-empty text matching `sel`.
pub fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// First non-empty `content` attribute among the given meta selectors.
pub fn meta_content(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let sel = Selector::parse(css).ok()?;
        doc.select(&sel)
            .filter_map(|el| el.value().attr("content"))
            .map(clean_text)
            .find(|c| !c.is_empty())
    })
}

pub fn page_language(doc: &Html) -> Option<String> {
    doc.root_element()
        .value()
        .attr("lang")
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

fn is_product_type(t: &Value) -> bool {
    match t {
        Value::String(s) => s == "Product",
        Value::Array(items) => items.iter().any(|v| v.as_str() == Some("Product")),
        _ => false,
    }
}

/// The first schema.org `Product` object in any JSON-LD block, including
/// nodes nested in `@graph`.
pub fn find_product_jsonld(doc: &Html) -> Option<Value> {
    let sel = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    for script in doc.select(&sel) {
        let raw = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };

        let candidates: Vec<Value> = match data {
            Value::Array(items) => items,
            other => vec![other],
        };
        for obj in candidates {
            if obj.get("@type").or_else(|| obj.get("type")).is_some_and(is_product_type) {
                return Some(obj);
            }
            if let Some(Value::Array(graph)) = obj.get("@graph")
                && let Some(node) = graph
                    .iter()
                    .find(|n| n.get("@type").is_some_and(is_product_type))
            {
                return Some(node.clone());
            }
        }
    }
    None
}

pub fn jsonld_str(prod: &Value, key: &str) -> Option<String> {
    let text = match prod.get(key)? {
        Value::String(s) => clean_text(s),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(text).filter(|s| !s.is_empty())
}

pub fn jsonld_images(prod: &Value) -> Vec<String> {
    match prod.get("image") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("url").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::Object(o)) => o
            .get("url")
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn jsonld_price(prod: &Value) -> Option<f64> {
    let price_of = |offer: &Value| -> Option<f64> {
        match offer.get("price").or_else(|| offer.get("lowPrice"))? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_price(s),
            _ => None,
        }
    };

    match prod.get("offers")? {
        Value::Array(offers) => offers.iter().find_map(price_of),
        offer => price_of(offer),
    }
}

/// Parse the first amount in a human price. The rightmost of `.`/`,`
/// followed by one or two digits is the decimal separator; other separators
/// group thousands.
pub fn parse_price(text: &str) -> Option<f64> {
    let raw = PRICE_TOKEN.find(text)?.as_str();

    let normalized = match raw.rfind(['.', ',']) {
        Some(pos) if (1..=2).contains(&(raw.len() - pos - 1)) => {
            let (int_part, frac) = raw.split_at(pos);
            let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
            format!("{int_digits}.{}", &frac[1..])
        }
        _ => raw.chars().filter(char::is_ascii_digit).collect(),
    };

    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Text of a price container without struck-through old prices
/// (`<del>`, `<s>`, `<strike>` or an `old` class).
pub fn current_price_text(el: ElementRef<'_>) -> String {
    let parts: Vec<&str> = el
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let struck = node
                .ancestors()
                .take_while(|a| a.id() != el.id())
                .filter_map(|a| a.value().as_element())
                .any(|e| {
                    matches!(e.name(), "del" | "s" | "strike") || e.classes().any(|c| c.contains("old"))
                });
            (!struck).then_some(&**text)
        })
        .collect();
    clean_text(&parts.join(" "))
}

/// First price-looking amount in free text.
pub fn price_in_text(text: &str) -> Option<f64> {
    PRICE_WITH_CURRENCY
        .captures(text)
        .and_then(|c| parse_price(&c[1]))
        .or_else(|| {
            CURRENCY_THEN_PRICE
                .captures(text)
                .and_then(|c| parse_price(&c[1]))
        })
}

/// Resolve, filter and de-duplicate image URLs, keeping document order.
pub fn normalize_images<I>(base: &Url, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|src| {
            let src = src.trim();
            if src.is_empty() || src.to_ascii_lowercase().starts_with("data:") {
                return None;
            }
            base.join(src).ok().map(String::from)
        })
        .filter(|u| {
            let lower = u.to_ascii_lowercase();
            !["logo", "icon", "sprite"].iter().any(|x| lower.contains(x))
        })
        .filter(|u| seen.insert(u.clone()))
        .take(MAX_IMAGES)
        .collect()
}

/// Image URL of an `<img>`, preferring the lazy-load attributes.
pub fn image_source(el: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    let value = el.value();
    if let Some(attr) = attr {
        return value.attr(attr).map(str::to_string);
    }
    value
        .attr("data-src")
        .or_else(|| value.attr("data-original"))
        .or_else(|| value.attr("src"))
        .map(str::to_string)
}

/// Two-cell table rows under the usual specification containers.
pub fn specs_from_tables(doc: &Html) -> BTreeMap<String, String> {
    let mut specs = BTreeMap::new();
    let (Ok(rows), Ok(cells)) = (
        Selector::parse(
            ".specifications tr, .product-specs tr, #specifications tr, .product-attributes tr",
        ),
        Selector::parse("th, td"),
    ) else {
        return specs;
    };

    for row in doc.select(&rows) {
        let texts: Vec<String> = row.select(&cells).map(element_text).collect();
        if let [key, value] = texts.as_slice()
            && !key.is_empty()
            && !value.is_empty()
        {
            specs.insert(key.trim_end_matches(':').to_string(), value.clone());
        }
    }
    specs
}

/// Plain text of an HTML fragment.
pub fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    clean_text(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}
