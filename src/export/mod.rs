//! Gomag import spreadsheet writer.
//!
//! Column order is fixed by [`GOMAG_HEADERS`]. Rows missing a required field
//! are left out and reported in the [`ExportSummary`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rust_xlsxwriter::{Format, Workbook};
use tracing::{info, warn};

use crate::config::{ExportConfig, PricingConfig};
use crate::error::ExportError;
use crate::models::{ExportRow, ReviewRow, Variant};
use crate::pricing::shorten_sku;
use crate::scrapers::html::fragment_text;

/// Gomag "Model import" layout this writer targets
pub const SCHEMA_VERSION: &str = "gomag-model-import/1";

pub const GOMAG_HEADERS: [&str; 13] = [
    "Cod Produs (SKU)",
    "Denumire Produs",
    "Descriere Produs",
    "Descriere Scurta a Produsului",
    "URL Poza de Produs",
    "Pret",
    "Pretul Include TVA",
    "Cota TVA",
    "Moneda",
    "Stoc Cantitativ",
    "Activ in Magazin",
    "Categorie / Categorii",
    "Variante",
];

const SHORT_DESCRIPTION_LEN: usize = 200;

#[derive(Debug)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub written: usize,
    pub excluded: Vec<ExportError>,
}

fn short_description(description: &str) -> String {
    let text = fragment_text(description);
    match text.char_indices().nth(SHORT_DESCRIPTION_LEN) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text,
    }
}

fn format_variants(variants: &[Variant]) -> String {
    variants
        .iter()
        .map(|v| match v.price {
            Some(price) => format!("{}: {} ({:.2})", v.name, v.value, price),
            None => format!("{}: {}", v.name, v.value),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Flatten one review row; fails when a required field is empty.
pub fn to_export_row(
    row: &ReviewRow,
    pricing: &PricingConfig,
    export: &ExportConfig,
) -> Result<ExportRow, ExportError> {
    let missing = |field| ExportError::MissingField {
        index: row.index,
        field,
    };

    let title = row
        .record
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| missing("title"))?;
    let sku = shorten_sku(&row.sku, export.sku_max_len);
    if sku.is_empty() {
        return Err(missing("sku"));
    }
    let description = row.record.description.clone().unwrap_or_default();

    Ok(ExportRow {
        sku,
        title: title.to_string(),
        short_description: short_description(&description),
        description,
        images: row.record.images.join("\n"),
        price: row.final_price,
        // Left empty: Gomag inherits the VAT setting from the parent product
        price_includes_vat: String::new(),
        vat_rate: pricing.vat_rate,
        currency: pricing.currency.clone(),
        stock: row.stock,
        active: if row.active { "DA" } else { "NU" }.to_string(),
        categories: row.category.clone().unwrap_or_default(),
        variants: format_variants(&row.record.variants),
    })
}

/// Convert approved rows, splitting off the ones that cannot be exported.
pub fn build_export(
    rows: &[&ReviewRow],
    pricing: &PricingConfig,
    export: &ExportConfig,
) -> (Vec<ExportRow>, Vec<ExportError>) {
    let mut ok = Vec::with_capacity(rows.len());
    let mut excluded = Vec::new();
    for row in rows {
        match to_export_row(row, pricing, export) {
            Ok(export_row) => ok.push(export_row),
            Err(e) => {
                warn!("Excluding from export: {}", e);
                excluded.push(e);
            }
        }
    }
    (ok, excluded)
}

fn text_cells(row: &ExportRow) -> [String; 13] {
    [
        row.sku.clone(),
        row.title.clone(),
        row.description.clone(),
        row.short_description.clone(),
        row.images.clone(),
        format!("{:.2}", row.price),
        row.price_includes_vat.clone(),
        row.vat_rate.to_string(),
        row.currency.clone(),
        row.stock.to_string(),
        row.active.clone(),
        row.categories.clone(),
        row.variants.clone(),
    ]
}

fn write_csv(rows: &[ExportRow], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(GOMAG_HEADERS)?;
    for row in rows {
        writer.write_record(text_cells(row))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx(rows: &[ExportRow], path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (col, header) in GOMAG_HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }
    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        for (col, value) in text_cells(row).into_iter().enumerate() {
            let col = col as u16;
            match col {
                5 => sheet.write_number(r, col, row.price)?,
                7 => sheet.write_number(r, col, row.vat_rate)?,
                9 => sheet.write_number(r, col, row.stock)?,
                _ => sheet.write_string(r, col, value)?,
            };
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Write `rows` to `path`; the extension picks xlsx or csv.
pub fn write_export(rows: &[ExportRow], path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "xlsx" => write_xlsx(rows, path),
        "csv" => write_csv(rows, path),
        other => bail!("unsupported export format `.{other}`, use .xlsx or .csv"),
    }
    .with_context(|| format!("writing export {}", path.display()))?;

    info!(
        "Wrote {} rows to {} ({})",
        rows.len(),
        path.display(),
        SCHEMA_VERSION
    );
    Ok(())
}

pub fn export_rows(
    rows: &[&ReviewRow],
    pricing: &PricingConfig,
    export: &ExportConfig,
    path: &Path,
) -> Result<ExportSummary> {
    let (export_rows, excluded) = build_export(rows, pricing, export);
    write_export(&export_rows, path)?;
    Ok(ExportSummary {
        path: path.to_path_buf(),
        written: export_rows.len(),
        excluded,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use calamine::{Data, Reader, open_workbook_auto};
    use chrono::Utc;

    use super::*;
    use crate::models::{Approval, ProductRecord, RowStatus};

    fn review_row(index: usize, title: Option<&str>, sku: &str, final_price: f64) -> ReviewRow {
        ReviewRow {
            index,
            record: ProductRecord {
                title: title.map(str::to_string),
                description: Some("<p>Cana din <b>ceramica</b></p>".to_string()),
                images: vec![
                    "https://cdn.example.com/1.jpg".to_string(),
                    "https://cdn.example.com/2.jpg".to_string(),
                ],
                variants: vec![Variant {
                    name: "Culoare".to_string(),
                    value: "Alb".to_string(),
                    price: None,
                }],
                ..ProductRecord::empty("https://shop.example.com/p/1", "shop.example.com")
            },
            sku: sku.to_string(),
            final_price,
            stock: 1,
            active: true,
            needs_translation: false,
            category: Some("Bucatarie".to_string()),
            approval: Approval::Approved,
            status: RowStatus::Ok,
            failure: None,
            edited: false,
            updated_at: Utc::now(),
        }
    }

    fn sample() -> Vec<ReviewRow> {
        vec![
            review_row(0, Some("Cana"), "CA-1", 100.0),
            review_row(1, None, "FARA-TITLU", 1.0),
            review_row(2, Some("Bol"), "BOL-2", 24.5),
        ]
    }

    #[test]
    fn export_row_carries_fixed_values() {
        let row = review_row(0, Some("Cana"), "CA-1", 100.0);
        let out = to_export_row(&row, &PricingConfig::default(), &ExportConfig::default()).unwrap();
        assert_eq!(out.price, 100.0);
        assert_eq!(out.stock, 1);
        assert_eq!(out.active, "DA");
        assert_eq!(out.vat_rate, 21);
        assert_eq!(out.currency, "RON");
        assert_eq!(out.short_description, "Cana din ceramica");
        assert_eq!(out.images, "https://cdn.example.com/1.jpg\nhttps://cdn.example.com/2.jpg");
        assert_eq!(out.variants, "Culoare: Alb");
        assert_eq!(out.categories, "Bucatarie");
    }

    #[test]
    fn rows_without_title_are_reported() {
        let rows = sample();
        let refs: Vec<&ReviewRow> = rows.iter().collect();
        let (ok, excluded) = build_export(&refs, &PricingConfig::default(), &ExportConfig::default());
        assert_eq!(ok.len(), 2);
        assert_eq!(
            excluded,
            vec![ExportError::MissingField {
                index: 1,
                field: "title"
            }]
        );
    }

    fn expected_tuples() -> BTreeSet<(String, String, String)> {
        [("Cana", 100.0, "CA-1"), ("Bol", 24.5, "BOL-2")]
            .into_iter()
            .map(|(t, p, s)| (t.to_string(), format!("{p:.2}"), s.to_string()))
            .collect()
    }

    #[test]
    fn csv_round_trip_keeps_title_price_sku() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.csv");
        let rows = sample();
        let refs: Vec<&ReviewRow> = rows.iter().collect();

        let summary =
            export_rows(&refs, &PricingConfig::default(), &ExportConfig::default(), &path).unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.excluded.len(), 1);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers, GOMAG_HEADERS);

        let tuples: BTreeSet<_> = reader
            .records()
            .map(|r| {
                let r = r.unwrap();
                let price: f64 = r[5].parse().unwrap();
                (r[1].to_string(), format!("{price:.2}"), r[0].to_string())
            })
            .collect();
        assert_eq!(tuples, expected_tuples());
    }

    #[test]
    fn xlsx_round_trip_keeps_title_price_sku() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.xlsx");
        let rows = sample();
        let refs: Vec<&ReviewRow> = rows.iter().collect();
        export_rows(&refs, &PricingConfig::default(), &ExportConfig::default(), &path).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        let range = workbook.worksheet_range_at(0).unwrap().unwrap();
        let mut lines = range.rows();
        let header: Vec<String> = lines.next().unwrap().iter().map(|c| c.to_string()).collect();
        assert_eq!(header, GOMAG_HEADERS);

        let tuples: BTreeSet<_> = lines
            .map(|r| {
                let price = match &r[5] {
                    Data::Float(f) => *f,
                    Data::Int(i) => *i as f64,
                    other => panic!("price cell is {other:?}"),
                };
                (r[1].to_string(), format!("{price:.2}"), r[0].to_string())
            })
            .collect();
        assert_eq!(tuples, expected_tuples());
    }

    #[test]
    fn unknown_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_export(&[], &dir.path().join("import.ods")).is_err());
    }
}
