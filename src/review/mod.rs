//! The Review Table: scraped rows staged for operator edits and approval.
//!
//! Rows are keyed by their original spreadsheet index, which never changes.
//! Derived fields are recomputed through [`crate::pricing`] whenever the
//! source price is edited, so the pricing invariants hold after any edit.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};
use url::Url;

use crate::config::{ApprovalPolicy, ExportConfig, PricingConfig};
use crate::error::{ExtractionFailure, ReviewError, TransformWarning};
use crate::models::{Approval, ProductRecord, ReviewRow, RowStatus, SourceRow};
use crate::pricing;

/// Turn one scrape outcome into a review row.
pub fn build_row(
    source: &SourceRow,
    result: Result<ProductRecord, ExtractionFailure>,
    pricing_cfg: &PricingConfig,
    export_cfg: &ExportConfig,
) -> ReviewRow {
    let (record, failure) = match result {
        Ok(record) => (record, None),
        Err(failure) => {
            let domain = Url::parse(source.url.trim())
                .ok()
                .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
                .unwrap_or_default();
            (ProductRecord::empty(&source.url, &domain), Some(failure))
        }
    };

    let derived = pricing::derive(&record, pricing_cfg, export_cfg);
    if !derived.warnings.is_empty() {
        debug!("Row {}: {:?}", source.index, derived.warnings);
    }
    let mut row = ReviewRow {
        index: source.index,
        sku: derived.sku,
        final_price: derived.final_price,
        stock: derived.stock,
        active: derived.active,
        needs_translation: derived.needs_translation,
        category: None,
        approval: Approval::Pending,
        status: RowStatus::Ok,
        failure,
        edited: false,
        updated_at: Utc::now(),
        record,
    };
    row.status = evaluate_status(&row);
    row
}

fn evaluate_status(row: &ReviewRow) -> RowStatus {
    if row.approval == Approval::Rejected {
        return RowStatus::Excluded("rejected by operator".to_string());
    }
    if let Some(failure) = &row.failure
        && row.record.title.is_none()
    {
        return RowStatus::NeedsReview(failure.to_string());
    }
    if row.record.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
        return RowStatus::NeedsReview("missing title".to_string());
    }
    if !row.edited && !matches!(row.record.price, Some(p) if p > 0.0) {
        return RowStatus::NeedsReview(TransformWarning::DefaultPrice.to_string());
    }
    RowStatus::Ok
}

/// Editable fields; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct RowEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub sku: Option<String>,
    /// Source price; the final price is derived from it
    pub price: Option<f64>,
    pub images: Option<Vec<String>>,
    pub category: Option<String>,
}

impl RowEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.sku.is_none()
            && self.price.is_none()
            && self.images.is_none()
            && self.category.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewTable {
    rows: BTreeMap<usize, ReviewRow>,
    categories: Vec<String>,
}

impl ReviewTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = ReviewRow>,
    {
        Self {
            rows: rows.into_iter().map(|r| (r.index, r)).collect(),
            categories: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows in original spreadsheet order.
    pub fn rows(&self) -> impl Iterator<Item = &ReviewRow> {
        self.rows.values()
    }

    pub fn get(&self, index: usize) -> Option<&ReviewRow> {
        self.rows.get(&index)
    }

    fn row_mut(&mut self, index: usize) -> Result<&mut ReviewRow, ReviewError> {
        self.rows.get_mut(&index).ok_or(ReviewError::UnknownRow(index))
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn set_categories(&mut self, categories: Vec<String>) {
        info!("Review table now knows {} categories", categories.len());
        self.categories = categories;
    }

    /// Apply operator edits to one row and re-derive what depends on them.
    pub fn update(
        &mut self,
        index: usize,
        edit: RowEdit,
        pricing_cfg: &PricingConfig,
        export_cfg: &ExportConfig,
    ) -> Result<(), ReviewError> {
        if let Some(price) = edit.price
            && !(price.is_finite() && price >= 0.0)
        {
            return Err(ReviewError::InvalidPrice(price));
        }
        if let Some(category) = &edit.category
            && !self.categories.is_empty()
            && !self.categories.iter().any(|c| c == category)
        {
            return Err(ReviewError::UnknownCategory(category.clone()));
        }
        if edit.is_empty() {
            return Ok(());
        }

        let row = self.row_mut(index)?;
        let rec = &mut row.record;

        if let Some(title) = edit.title {
            rec.title = Some(title).filter(|t| !t.trim().is_empty());
            row.needs_translation = false;
        }
        if let Some(description) = edit.description {
            rec.description = Some(description).filter(|d| !d.trim().is_empty());
            row.needs_translation = false;
        }
        if let Some(sku) = edit.sku {
            row.sku = pricing::ensure_sku(&rec.source_url, Some(&sku), export_cfg.sku_max_len);
            rec.sku = Some(sku).filter(|s| !s.trim().is_empty());
        }
        if let Some(price) = edit.price {
            rec.price = Some(price);
            row.final_price = pricing::final_price(rec.price, pricing_cfg);
        }
        if let Some(images) = edit.images {
            rec.images = images;
        }
        if let Some(category) = edit.category {
            row.category = Some(category);
        }

        row.edited = true;
        row.updated_at = Utc::now();
        row.status = evaluate_status(row);
        debug!("Row {} edited", index);
        Ok(())
    }

    fn set_approval(&mut self, index: usize, approval: Approval) -> Result<(), ReviewError> {
        let row = self.row_mut(index)?;
        row.approval = approval;
        row.updated_at = Utc::now();
        row.status = match approval {
            Approval::Rejected => RowStatus::Excluded("rejected by operator".to_string()),
            _ if matches!(row.status, RowStatus::Excluded(_)) => evaluate_status(row),
            _ => row.status.clone(),
        };
        Ok(())
    }

    pub fn approve(&mut self, index: usize) -> Result<(), ReviewError> {
        self.set_approval(index, Approval::Approved)
    }

    pub fn reject(&mut self, index: usize) -> Result<(), ReviewError> {
        self.set_approval(index, Approval::Rejected)
    }

    /// Approve every row that was not rejected; returns how many changed.
    pub fn approve_all(&mut self) -> usize {
        let mut changed = 0;
        for row in self.rows.values_mut() {
            if row.approval == Approval::Pending {
                row.approval = Approval::Approved;
                row.updated_at = Utc::now();
                changed += 1;
            }
        }
        changed
    }

    /// Mark a row excluded from the export, keeping its approval.
    pub fn mark_excluded(&mut self, index: usize, reason: String) -> Result<(), ReviewError> {
        let row = self.row_mut(index)?;
        row.status = RowStatus::Excluded(reason);
        Ok(())
    }

    /// Rows that go to the export under `policy`, in spreadsheet order.
    pub fn exportable(&self, policy: ApprovalPolicy) -> Vec<&ReviewRow> {
        self.rows
            .values()
            .filter(|r| match policy {
                ApprovalPolicy::Explicit => r.approval == Approval::Approved,
                ApprovalPolicy::AllNonRejected => r.approval != Approval::Rejected,
            })
            .collect()
    }

    /// Counts per status label: (ok, needs_review, excluded).
    pub fn status_counts(&self) -> (usize, usize, usize) {
        self.rows.values().fold((0, 0, 0), |(ok, review, excluded), r| match r.status {
            RowStatus::Ok => (ok + 1, review, excluded),
            RowStatus::NeedsReview(_) => (ok, review + 1, excluded),
            RowStatus::Excluded(_) => (ok, review, excluded + 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(index: usize, url: &str) -> SourceRow {
        SourceRow {
            index,
            url: url.to_string(),
            columns: BTreeMap::new(),
        }
    }

    fn record(url: &str, title: &str, price: Option<f64>) -> ProductRecord {
        ProductRecord {
            title: Some(title.to_string()),
            price,
            ..ProductRecord::empty(url, "shop.example.com")
        }
    }

    fn table() -> ReviewTable {
        let cfg = PricingConfig::default();
        let export = ExportConfig::default();
        let a = "https://shop.example.com/p/1";
        let b = "https://shop.example.com/p/2";
        let c = "https://shop.example.com/p/3";
        ReviewTable::from_rows(vec![
            build_row(&source(0, a), Ok(record(a, "Cana", Some(20.0))), &cfg, &export),
            build_row(&source(1, b), Ok(record(b, "Farfurie", None)), &cfg, &export),
            build_row(
                &source(2, c),
                Err(ExtractionFailure::Blocked("http 403".to_string())),
                &cfg,
                &export,
            ),
        ])
    }

    #[test]
    fn rows_get_status_from_their_outcome() {
        let t = table();
        let rows: Vec<_> = t.rows().collect();
        assert_eq!(rows[0].status, RowStatus::Ok);
        assert_eq!(rows[0].final_price, 40.0);
        assert_eq!(rows[1].status.label(), "needs_review");
        assert_eq!(rows[1].final_price, 1.0);
        assert!(rows[2].status.reason().unwrap().contains("blocked"));
        assert_eq!(rows[2].sku, "shop-example-com-3");
        assert!(rows.iter().all(|r| r.stock == 1 && r.active));
    }

    #[test]
    fn editing_price_rederives_final_price() {
        let mut t = table();
        let cfg = PricingConfig::default();
        t.update(
            1,
            RowEdit {
                price: Some(12.5),
                ..RowEdit::default()
            },
            &cfg,
            &ExportConfig::default(),
        )
        .unwrap();

        let row = t.get(1).unwrap();
        assert_eq!(row.final_price, 25.0);
        assert!(row.edited);
        assert_eq!(row.status, RowStatus::Ok);
        assert_eq!(row.index, 1);
    }

    #[test]
    fn filling_a_failed_row_clears_needs_review() {
        let mut t = table();
        let cfg = PricingConfig::default();
        t.update(
            2,
            RowEdit {
                title: Some("Bol".to_string()),
                price: Some(8.0),
                ..RowEdit::default()
            },
            &cfg,
            &ExportConfig::default(),
        )
        .unwrap();
        assert_eq!(t.get(2).unwrap().status, RowStatus::Ok);
    }

    #[test]
    fn invalid_edits_are_refused() {
        let mut t = table();
        let cfg = PricingConfig::default();
        t.set_categories(vec!["Bucatarie".to_string()]);

        let bad_price = RowEdit {
            price: Some(-3.0),
            ..RowEdit::default()
        };
        assert_eq!(
            t.update(0, bad_price, &cfg, &ExportConfig::default()),
            Err(ReviewError::InvalidPrice(-3.0))
        );

        let bad_category = RowEdit {
            category: Some("Gradina".to_string()),
            ..RowEdit::default()
        };
        assert!(matches!(
            t.update(0, bad_category, &cfg, &ExportConfig::default()),
            Err(ReviewError::UnknownCategory(_))
        ));
        assert_eq!(t.approve(42), Err(ReviewError::UnknownRow(42)));
    }

    #[test]
    fn export_follows_approval_policy() {
        let mut t = table();
        t.approve(0).unwrap();
        t.reject(1).unwrap();

        let explicit: Vec<_> = t.exportable(ApprovalPolicy::Explicit).iter().map(|r| r.index).collect();
        assert_eq!(explicit, vec![0]);

        let lenient: Vec<_> = t
            .exportable(ApprovalPolicy::AllNonRejected)
            .iter()
            .map(|r| r.index)
            .collect();
        assert_eq!(lenient, vec![0, 2]);
        assert_eq!(t.get(1).unwrap().status.label(), "excluded");
    }

    #[test]
    fn edited_sku_is_stored_as_exported() {
        let mut t = table();
        let export = ExportConfig::default();
        t.update(
            0,
            RowEdit {
                sku: Some("COD-FURNIZOR-CANA-CERAMICA-ALBA-350ML".to_string()),
                ..RowEdit::default()
            },
            &PricingConfig::default(),
            &export,
        )
        .unwrap();

        let row = t.get(0).unwrap();
        assert!(row.sku.chars().count() <= export.sku_max_len);
        assert!(row.sku.starts_with("COD-FURNIZOR-CANA"));
        assert_eq!(
            row.record.sku.as_deref(),
            Some("COD-FURNIZOR-CANA-CERAMICA-ALBA-350ML")
        );
    }

    #[test]
    fn approve_all_skips_rejected_rows() {
        let mut t = table();
        t.reject(2).unwrap();
        assert_eq!(t.approve_all(), 2);
        assert_eq!(t.get(2).unwrap().approval, Approval::Rejected);
        assert_eq!(t.status_counts(), (1, 1, 1));
    }
}
