pub mod automation;
pub mod browser;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod fetch;
pub mod importer;
pub mod models;
pub mod pricing;
pub mod review;
pub mod scrapers;
pub mod spreadsheet;
pub mod traits;

pub use importer::Importer;
