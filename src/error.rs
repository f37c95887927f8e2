//! Error taxonomy for the import pipeline.
//!
//! Row-scoped errors (`ExtractionFailure`, `TransformWarning`, `ExportError`)
//! never abort a batch; they end up as a visible status on the row.
//! `AutomationError` halts only the upload flow. `FatalInputError` aborts the
//! whole run.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single product page could not be turned into a record.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExtractionFailure {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("http status {0}")]
    HttpStatus(u16),

    #[error("blocked by anti-bot protection: {0}")]
    Blocked(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cancelled before scraping")]
    Cancelled,
}

/// Transformer findings. Defaults cover every missing input, so these are
/// warnings attached to the row rather than failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformWarning {
    #[error("no source price, using default price")]
    DefaultPrice,

    #[error("no site sku, generated from url")]
    GeneratedSku,
}

/// A row that cannot be written to the import spreadsheet.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    #[error("row {index}: required field `{field}` is empty")]
    MissingField { index: usize, field: &'static str },
}

/// Stages of the admin automation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomationStage {
    Idle,
    LoggedIn,
    CategoriesListed,
    FileUploaded,
    ImportStarted,
    ImportConfirmed,
    ImportFailed,
}

impl fmt::Display for AutomationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::LoggedIn => "LoggedIn",
            Self::CategoriesListed => "CategoriesListed",
            Self::FileUploaded => "FileUploaded",
            Self::ImportStarted => "ImportStarted",
            Self::ImportConfirmed => "ImportConfirmed",
            Self::ImportFailed => "ImportFailed",
        };
        f.write_str(name)
    }
}

/// Why an automation stage could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationReason {
    ElementNotFound(String),
    Timeout,
    Navigation(String),
    Browser(String),
    /// The import list did not change after starting the import
    NoNewImport,
    /// The newest import row reports errors
    ImportRejected(String),
    InvalidTransition { from: AutomationStage },
}

impl AutomationReason {
    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ElementNotFound(_) => "element_not_found",
            Self::Timeout => "timeout",
            Self::Navigation(_) => "navigation_failed",
            Self::Browser(_) => "browser_error",
            Self::NoNewImport => "no_new_import",
            Self::ImportRejected(_) => "import_rejected",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

impl fmt::Display for AutomationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementNotFound(selector) => write!(f, "element_not_found ({selector})"),
            Self::Timeout => f.write_str("timeout"),
            Self::Navigation(msg) => write!(f, "navigation_failed ({msg})"),
            Self::Browser(msg) => write!(f, "browser_error ({msg})"),
            Self::NoNewImport => f.write_str("no_new_import"),
            Self::ImportRejected(row) => write!(f, "import_rejected ({row})"),
            Self::InvalidTransition { from } => write!(f, "invalid_transition (from {from})"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("automation failed at stage {stage}: {reason}")]
pub struct AutomationError {
    pub stage: AutomationStage,
    pub reason: AutomationReason,
}

impl AutomationError {
    pub fn new(stage: AutomationStage, reason: AutomationReason) -> Self {
        Self { stage, reason }
    }
}

/// Input problems that make the whole run pointless.
#[derive(Debug, Error)]
pub enum FatalInputError {
    #[error("cannot read spreadsheet {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("unsupported spreadsheet format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("no url column found (expected one of: url, link, product_url)")]
    NoUrlColumn,

    #[error("spreadsheet {0} has no rows")]
    Empty(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid selector `{selector}` for {field}")]
    Selector { field: String, selector: String },

    #[error("missing environment variable {0}")]
    MissingEnv(String),
}

/// Operator edits that cannot be applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReviewError {
    #[error("no review row with index {0}")]
    UnknownRow(usize),

    #[error("unknown category `{0}`")]
    UnknownCategory(String),

    #[error("invalid price {0}")]
    InvalidPrice(f64),
}
