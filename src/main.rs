use clap::Parser;
use eth_ingest::importer::lib::{
    start_import_service, ApplicationConfig, ImportConfigBuilder, ServiceConfig,
};
use eth_ingest::ImportOutcome;
use eyre::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; command line values take precedence over it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First block number to import
    #[arg(short, long)]
    start: Option<u64>,

    /// Block number to stop at (exclusive)
    #[arg(short, long)]
    end: Option<u64>,

    /// Dispatch transactions to the transaction store
    #[arg(long)]
    tx_import: Option<bool>,

    /// Write blocks to the block store
    #[arg(long)]
    block_import: Option<bool>,

    /// Maximum number of blocks in flight
    #[arg(short, long)]
    backpressure: Option<usize>,

    /// Path of the node's IPC socket
    #[arg(long)]
    ipc_path: Option<PathBuf>,

    /// Postgres connection string; records stay in memory without one
    #[arg(long)]
    db: Option<String>,

    /// Bind address of the health and status endpoints
    #[arg(long)]
    router: Option<String>,
}

impl Cli {
    fn import_builder(&self, file: Option<&ApplicationConfig>) -> Result<ImportConfigBuilder> {
        let mut builder = match file {
            Some(file) => file.builder()?,
            None => ImportConfigBuilder::new(),
        };
        if let Some(start) = self.start {
            builder = builder.start_block(start);
        }
        if let Some(end) = self.end {
            builder = builder.end_block(end);
        }
        if let Some(tx_import) = self.tx_import {
            builder = builder.import_transactions(tx_import);
        }
        if let Some(block_import) = self.block_import {
            builder = builder.import_blocks(block_import);
        }
        if let Some(backpressure) = self.backpressure {
            builder = builder.backpressure_blocks(backpressure);
        }
        Ok(builder)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let file = cli
        .config
        .as_deref()
        .map(ApplicationConfig::load)
        .transpose()?;

    let import_config = cli.import_builder(file.as_ref())?.build()?;
    let service_config = ServiceConfig::resolve(
        file.as_ref(),
        cli.ipc_path.clone(),
        cli.db.clone(),
        cli.router.clone(),
    )?;

    info!(
        "Starting import of [{}, {}) from {}",
        import_config.start_block,
        import_config.end_block,
        service_config.ipc_path.display()
    );

    let should_terminate = Arc::new(AtomicBool::new(false));
    setup_ctrlc_handler(Arc::clone(&should_terminate))?;

    match start_import_service(import_config, service_config, should_terminate).await? {
        ImportOutcome::Finished { imported } => {
            info!("Import finished, {imported} blocks imported");
            Ok(())
        }
        ImportOutcome::Cancelled => {
            warn!("Import cancelled");
            Ok(())
        }
        ImportOutcome::Errored { last_hash } => Err(eyre::eyre!(
            "Import failed, last block fetched: {}",
            last_hash.as_deref().unwrap_or("none")
        )),
    }
}

fn setup_ctrlc_handler(should_terminate: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C");
        info!("Waiting for current processes to finish...");
        should_terminate.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")
}
