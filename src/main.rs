use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gomag_importer::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "gomag_importer=debug"
    } else {
        "gomag_importer=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    info!("Starting Gomag importer");

    if let Err(e) = cli::run(cli).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
