//! CLI entry point for the camscan network scanner.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use camscan_core::{AppConfig, Overrides};
use camscan_inventory::{Inventory, InventoryClient, MemoryInventory};

use camscan_scan::builder::Probes;
use camscan_scan::tasks::TaskManager;

#[derive(Parser)]
#[command(name = "camscan")]
#[command(about = "SNMP/ICMP scanner for access point and subscriber module inventories")]
struct Cli {
    /// Number of concurrent probe workers (values below 1 are ignored).
    #[arg(short, long)]
    workers: Option<i64>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,

    /// Probe without writing to the inventory or exporting results.
    #[arg(long)]
    dry_run: bool,

    /// Sweep registered subnets with ICMP and classify responding hosts.
    #[arg(long)]
    discover: bool,

    /// Config file prefix (default: camscan).
    #[arg(short, long, default_value = "camscan")]
    config: String,

    /// Scan from a JSON inventory snapshot instead of Neo4j.
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Directory for ap.csv and sm.csv.
    #[arg(long)]
    export_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Installed before config loading so normalization warnings are seen.
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).json().init();

    let overrides = Overrides {
        workers: cli.workers,
        debug: cli.debug,
        dry_run: cli.dry_run,
        discover: cli.discover,
        export_dir: cli.export_dir.clone(),
    };
    let config = AppConfig::load(&cli.config, &overrides)?;

    tracing::debug!(
        workers = config.workers,
        snmp_timeout_ap = config.snmp_timeout_ap,
        snmp_timeout_sm = config.snmp_timeout_sm,
        icmp_timeout = config.icmp_timeout,
        export_dir = %config.export_dir,
        "Configuration loaded"
    );

    let inventory: Arc<dyn Inventory> = match &cli.inventory {
        Some(path) => Arc::new(MemoryInventory::from_json_file(path)?),
        None => {
            let client = InventoryClient::connect_with_retry(&config.database).await?;
            tracing::info!(uri = %config.database.uri, "Connected to Neo4j");
            Arc::new(client)
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let manager = TaskManager::new(Arc::new(config), inventory, Probes::system());
    let report = manager.run(cancel).await?;

    if let Ok(summary) = serde_json::to_string(&report) {
        tracing::debug!(report = %summary, "Run report");
    }
    if let Some(error) = &report.export_error {
        tracing::warn!(error = %error, "Run finished without exporting results");
    }
    if report.cancelled {
        anyhow::bail!("Scan run {} was cancelled", report.run_id);
    }

    Ok(())
}
