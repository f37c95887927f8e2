//! Data models for source rows, scraped products and the review/export rows

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtractionFailure;

/// One input spreadsheet row, immutable once read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    /// Zero-based position among the data rows of the input sheet
    pub index: usize,
    pub url: String,
    /// Every column of the row keyed by its header
    pub columns: BTreeMap<String, String>,
}

/// A product option such as a colour or size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub value: String,
    pub price: Option<f64>,
}

/// How the page HTML was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    #[default]
    Http,
    Browser,
}

/// Normalized product data extracted from one page.
///
/// Fields the scraper could not find stay `None`/empty; nothing is guessed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source_url: String,
    pub domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub specifications: BTreeMap<String, String>,
    pub images: Vec<String>,
    pub sku: Option<String>,
    pub price: Option<f64>,
    pub variants: Vec<Variant>,
    /// Value of `<html lang>`, when present
    pub language: Option<String>,
    pub fetched_with: FetchMethod,
}

impl ProductRecord {
    pub fn empty(source_url: &str, domain: &str) -> Self {
        Self {
            source_url: source_url.to_string(),
            domain: domain.to_string(),
            ..Self::default()
        }
    }
}

/// Operator decision on a review row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Visible health of a row with its human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    NeedsReview(String),
    Excluded(String),
}

impl RowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NeedsReview(_) => "needs_review",
            Self::Excluded(_) => "excluded",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ok => None,
            Self::NeedsReview(reason) | Self::Excluded(reason) => Some(reason),
        }
    }
}

/// A scraped product plus the derived pricing/stock fields, staged for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRow {
    /// Original input row index, stable across edits
    pub index: usize,
    pub record: ProductRecord,
    pub sku: String,
    pub final_price: f64,
    pub stock: u32,
    pub active: bool,
    pub needs_translation: bool,
    pub category: Option<String>,
    pub approval: Approval,
    pub status: RowStatus,
    pub failure: Option<ExtractionFailure>,
    /// Set once the operator changed any editable field
    pub edited: bool,
    pub updated_at: DateTime<Utc>,
}

/// Flattened Gomag import row, built read-only at export time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub sku: String,
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub images: String,
    pub price: f64,
    pub price_includes_vat: String,
    pub vat_rate: u32,
    pub currency: String,
    pub stock: u32,
    pub active: String,
    pub categories: String,
    pub variants: String,
}
