//! Command-line surface: scrape, review, export and upload as separate steps,
//! with the Review Table kept in a workspace database in between.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::{AdminCredentials, AppConfig, DEFAULT_CONFIG_PATH};
use crate::database::{DEFAULT_WORKSPACE, ReviewStore};
use crate::export::ExportSummary;
use crate::importer::Importer;
use crate::models::{Approval, ReviewRow};
use crate::review::{ReviewTable, RowEdit};

#[derive(Debug, Parser)]
#[command(name = "gomag-importer", version, about = "Scrape product pages into a Gomag import file")]
pub struct Cli {
    /// Config file
    #[arg(short, long, global = true, env = "GOMAG_IMPORTER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Workspace database holding the review table between commands
    #[arg(short, long, global = true, env = "GOMAG_WORKSPACE", default_value = DEFAULT_WORKSPACE)]
    pub workspace: String,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read a spreadsheet of product urls and scrape every row
    Scrape { input: PathBuf },

    /// Inspect and edit the review table
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Log into the admin and store its category list
    Categories,

    /// Write approved rows to an .xlsx or .csv import file
    Export { output: PathBuf },

    /// Upload an import file through the admin and start the import
    Upload { file: PathBuf },

    /// Scrape, export and optionally upload in one go
    Run {
        input: PathBuf,
        output: PathBuf,
        /// Upload the export once written
        #[arg(long)]
        upload: bool,
        /// Approve every row that scraped cleanly
        #[arg(long)]
        approve_all: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ReviewAction {
    /// One line per row
    List {
        /// Only rows with this status (ok, needs_review, excluded)
        #[arg(long)]
        status: Option<String>,
    },
    /// Every field of one row
    Show { index: usize },
    Approve {
        #[arg(required = true)]
        indices: Vec<usize>,
    },
    Reject {
        #[arg(required = true)]
        indices: Vec<usize>,
    },
    /// Change editable fields of one row
    Edit {
        index: usize,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        sku: Option<String>,
        /// Source price; the final price is derived from it
        #[arg(long)]
        price: Option<f64>,
        /// Comma-separated image urls
        #[arg(long, value_delimiter = ',')]
        images: Option<Vec<String>>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Approve every row not rejected
    ApproveAll,
}

/// Flag set by Ctrl-C, checked between rows.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing rows in flight");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancel
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("█▓░"),
    );
    pb.set_message("Scraping...");
    Ok(pb)
}

fn summary_line(row: &ReviewRow) -> String {
    let approval = match row.approval {
        Approval::Pending => " ",
        Approval::Approved => "+",
        Approval::Rejected => "-",
    };
    let title = row.record.title.as_deref().unwrap_or("<no title>");
    let reason = row.status.reason().map(|r| format!(" ({r})")).unwrap_or_default();
    let translate = if row.needs_translation { " [translate]" } else { "" };
    format!(
        "{approval} {:>4}  {:<12} {:>10.2}  {:<30}  {}{translate}{reason}",
        row.index,
        row.status.label(),
        row.final_price,
        row.sku,
        title
    )
}

fn print_row(row: &ReviewRow) {
    let rec = &row.record;
    println!("Row {} [{}]", row.index, row.status.label());
    if let Some(reason) = row.status.reason() {
        println!("  reason:       {reason}");
    }
    println!("  url:          {}", rec.source_url);
    println!("  title:        {}", rec.title.as_deref().unwrap_or("-"));
    println!("  sku:          {}", row.sku);
    match rec.price {
        Some(price) => println!("  price:        {price:.2} -> {:.2}", row.final_price),
        None => println!("  price:        - -> {:.2}", row.final_price),
    }
    println!("  stock:        {}", row.stock);
    println!("  active:       {}", row.active);
    println!("  approval:     {:?}", row.approval);
    println!("  category:     {}", row.category.as_deref().unwrap_or("-"));
    println!("  translate:    {}", row.needs_translation);
    println!("  fetched with: {:?}", rec.fetched_with);
    println!("  images:       {}", rec.images.len());
    for image in &rec.images {
        println!("    {image}");
    }
    for (key, value) in &rec.specifications {
        println!("  spec {key}: {value}");
    }
    for variant in &rec.variants {
        println!("  variant {}: {}", variant.name, variant.value);
    }
    if let Some(description) = &rec.description {
        println!("  description:  {description}");
    }
}

fn print_export_summary(summary: &ExportSummary) {
    println!(
        "Exported {} rows to {}",
        summary.written,
        summary.path.display()
    );
    for err in &summary.excluded {
        println!("  excluded: {err}");
    }
}

async fn scrape(importer: &Importer, input: &Path) -> Result<ReviewTable> {
    let cancel = cancel_on_ctrl_c();
    let pb = progress_bar()?;
    let table = importer
        .scrape_file(input, &cancel, Some(&pb))
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    pb.finish_with_message("Done");

    if cancel.load(Ordering::Relaxed) {
        warn!("Batch cancelled; unscraped rows are marked for review");
    }
    Ok(table)
}

fn review(action: ReviewAction, table: &mut ReviewTable, config: &AppConfig) -> Result<bool> {
    match action {
        ReviewAction::List { status } => {
            for row in table.rows() {
                if status.as_deref().is_none_or(|s| s == row.status.label()) {
                    println!("{}", summary_line(row));
                }
            }
            let (ok, needs_review, excluded) = table.status_counts();
            println!("{ok} ok, {needs_review} need review, {excluded} excluded");
            Ok(false)
        }
        ReviewAction::Show { index } => {
            let row = table
                .get(index)
                .with_context(|| format!("no review row with index {index}"))?;
            print_row(row);
            Ok(false)
        }
        ReviewAction::Approve { indices } => {
            for index in indices {
                table.approve(index)?;
            }
            Ok(true)
        }
        ReviewAction::Reject { indices } => {
            for index in indices {
                table.reject(index)?;
            }
            Ok(true)
        }
        ReviewAction::Edit {
            index,
            title,
            description,
            sku,
            price,
            images,
            category,
        } => {
            let edit = RowEdit {
                title,
                description,
                sku,
                price,
                images,
                category,
            };
            if edit.is_empty() {
                bail!("nothing to edit, pass at least one --field");
            }
            table.update(index, edit, &config.pricing, &config.export)?;
            if let Some(row) = table.get(index) {
                println!("{}", summary_line(row));
            }
            Ok(true)
        }
        ReviewAction::ApproveAll => {
            let changed = table.approve_all();
            println!("Approved {changed} rows");
            Ok(true)
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config)?;
    let store = ReviewStore::new(&cli.workspace).await?;

    match cli.command {
        Command::Scrape { input } => {
            let importer = Importer::new(config)?;
            let mut table = scrape(&importer, &input).await?;
            table.set_categories(store.load_categories().await?);
            store.save_table(&table).await?;
            importer.shutdown().await;
            println!("Review the rows with `gomag-importer review list`");
        }
        Command::Review { action } => {
            let mut table = store.load_table().await?;
            if table.is_empty() {
                bail!("the workspace has no rows, run `scrape` first");
            }
            if review(action, &mut table, &config)? {
                store.save_table(&table).await?;
            }
        }
        Command::Categories => {
            let credentials = AdminCredentials::from_env()?;
            let importer = Importer::new(config)?;
            let categories = importer.fetch_categories(credentials).await?;
            store.save_categories(&categories).await?;
            for name in &categories {
                println!("{name}");
            }
        }
        Command::Export { output } => {
            let importer = Importer::new(config)?;
            let mut table = store.load_table().await?;
            let summary = importer.export(&mut table, &output)?;
            store.save_table(&table).await?;
            print_export_summary(&summary);
        }
        Command::Upload { file } => {
            let credentials = AdminCredentials::from_env()?;
            let importer = Importer::new(config)?;
            let report = importer.upload(credentials, &file).await?;
            println!("Import confirmed: {}", report.status);
        }
        Command::Run {
            input,
            output,
            upload,
            approve_all,
        } => {
            // Fail on missing credentials before spending time scraping
            let credentials = if upload {
                Some(AdminCredentials::from_env()?)
            } else {
                None
            };

            let importer = Importer::new(config)?;
            let mut table = scrape(&importer, &input).await?;
            if approve_all {
                table.approve_all();
            }
            let summary = importer.export(&mut table, &output)?;
            store.save_table(&table).await?;
            print_export_summary(&summary);

            if let Some(credentials) = credentials {
                if summary.written == 0 {
                    warn!("Nothing exported, skipping upload");
                } else {
                    match importer.upload(credentials, &output).await {
                        Ok(report) => println!("Import confirmed: {}", report.status),
                        Err(e) => {
                            info!("Export kept at {} for a manual upload", output.display());
                            importer.shutdown().await;
                            return Err(e);
                        }
                    }
                }
            }
            importer.shutdown().await;
        }
    }
    Ok(())
}
