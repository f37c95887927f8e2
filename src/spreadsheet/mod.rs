//! Input spreadsheet reading.
//!
//! The first row holds the headers. The URL column is found by name; every
//! other column is kept verbatim on the [`SourceRow`].

use std::collections::BTreeMap;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use tracing::{debug, info};

use crate::error::FatalInputError;
use crate::models::SourceRow;

/// Accepted URL column headers, compared case-insensitively after trimming.
pub const URL_COLUMN_ALIASES: &[&str] = &["url", "link", "product_url", "product link", "productlink"];

/// Position of the URL column among `headers`.
pub fn detect_url_column<S: AsRef<str>>(headers: &[S]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.as_ref().trim().to_lowercase();
        URL_COLUMN_ALIASES.contains(&h.as_str())
    })
}

pub fn read_source_rows(path: &Path) -> Result<Vec<SourceRow>, FatalInputError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let table = match extension.as_str() {
        "csv" => read_csv(path)?,
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(path)?,
        _ => return Err(FatalInputError::UnsupportedFormat(path.to_path_buf())),
    };

    let rows = rows_from_table(table)?;
    if rows.is_empty() {
        return Err(FatalInputError::Empty(path.to_path_buf()));
    }
    info!("Read {} product urls from {}", rows.len(), path.display());
    Ok(rows)
}

fn unreadable(path: &Path, reason: impl ToString) -> FatalInputError {
    FatalInputError::Unreadable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_csv(path: &Path) -> Result<Vec<Vec<String>>, FatalInputError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| unreadable(path, e))?;

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| unreadable(path, e))
        })
        .collect()
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<String>>, FatalInputError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| unreadable(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| FatalInputError::Empty(path.to_path_buf()))?
        .map_err(|e| unreadable(path, e))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn rows_from_table(table: Vec<Vec<String>>) -> Result<Vec<SourceRow>, FatalInputError> {
    let mut lines = table.into_iter();
    let Some(headers) = lines.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
    let url_col = detect_url_column(&headers).ok_or(FatalInputError::NoUrlColumn)?;
    debug!("Url column: {:?}", headers[url_col]);

    let rows = lines
        .enumerate()
        .filter_map(|(index, cells)| {
            let url = cells.get(url_col).map(|u| u.trim()).unwrap_or_default();
            if url.is_empty() {
                debug!("Skipping row {} without url", index);
                return None;
            }
            let columns: BTreeMap<String, String> = headers
                .iter()
                .zip(cells.iter())
                .filter(|(h, _)| !h.is_empty())
                .map(|(h, v)| (h.clone(), v.clone()))
                .collect();
            Some(SourceRow {
                index,
                url: url.to_string(),
                columns,
            })
        })
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn url_column_aliases_are_case_insensitive() {
        assert_eq!(detect_url_column(&["Name", " URL "]), Some(1));
        assert_eq!(detect_url_column(&["Product_URL"]), Some(0));
        assert_eq!(detect_url_column(&["nume", "Link"]), Some(1));
        assert_eq!(detect_url_column(&["Product Link"]), Some(0));
        assert_eq!(detect_url_column(&["nume", "pret"]), None);
    }

    #[test]
    fn csv_rows_keep_index_and_columns() {
        let file = csv_file(
            "Nume,Link,Nota\n\
             Cana,https://shop.example.com/p/1,ok\n\
             Gol,,\n\
             Bol, https://shop.example.com/p/2 ,\n",
        );
        let rows = read_source_rows(file.path()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[0].url, "https://shop.example.com/p/1");
        assert_eq!(rows[0].columns["Nota"], "ok");
        assert_eq!(rows[1].index, 2);
        assert_eq!(rows[1].url, "https://shop.example.com/p/2");
    }

    #[test]
    fn missing_url_column_is_fatal() {
        let file = csv_file("Nume,Pret\nCana,10\n");
        assert!(matches!(
            read_source_rows(file.path()),
            Err(FatalInputError::NoUrlColumn)
        ));
    }

    #[test]
    fn unreadable_inputs_are_fatal() {
        assert!(matches!(
            read_source_rows(Path::new("/nonexistent/products.csv")),
            Err(FatalInputError::Unreadable { .. })
        ));
        assert!(matches!(
            read_source_rows(Path::new("products.pdf")),
            Err(FatalInputError::UnsupportedFormat(_))
        ));

        let empty = csv_file("url\n\n");
        assert!(matches!(
            read_source_rows(empty.path()),
            Err(FatalInputError::Empty(_))
        ));
    }
}
