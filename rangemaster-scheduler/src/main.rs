//! Rangemaster Scheduler Service
//!
//! Runs the leader balancing workers against an in-process cluster view and
//! exports schedule counters for Prometheus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use rangemaster_scheduler::{
    init_metrics, DryRunTransferClient, PrometheusCollector, SchedulerConfig, SchedulerService,
};

#[derive(Parser)]
#[command(name = "rangemaster-scheduler")]
#[command(about = "Leader balancing scheduler for rangemaster")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "RANGEMASTER_CONFIG")]
    config: Option<PathBuf>,

    /// Leader balance interval in seconds
    #[arg(long)]
    leader_balance_interval: Option<u64>,

    /// Do not register the leader balance worker
    #[arg(long)]
    disable_leader_balance: bool,

    /// Log operators instead of sending them to storage nodes
    #[arg(long)]
    dry_run: Option<bool>,

    /// Prometheus exporter port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Do not start the Prometheus exporter
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SchedulerConfig::default(),
        };
        config.apply_env()?;

        if let Some(secs) = self.leader_balance_interval {
            config.leader_balance_interval_secs = secs;
        }
        if self.disable_leader_balance {
            config.enable_leader_balance = false;
        }
        if let Some(dry_run) = self.dry_run {
            config.dry_run = dry_run;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    info!(
        leader_balance_interval = config.leader_balance_interval_secs,
        enable_leader_balance = config.enable_leader_balance,
        max_node_write_ops = config.max_node_write_ops,
        max_storage_used_ratio = config.max_storage_used_ratio,
        dry_run = config.dry_run,
        "Starting rangemaster scheduler"
    );

    if !cli.no_metrics {
        init_metrics(config.metrics_port).context("Failed to start metrics exporter")?;
        info!(port = config.metrics_port, "Metrics exporter listening");
    }

    // `dry_run` is reserved: no storage transport is linked into this binary
    if !config.dry_run {
        warn!("No leader transfer transport configured, operators will only be logged");
    }

    let mut service = SchedulerService::new(
        config,
        Arc::new(DryRunTransferClient),
        Arc::new(PrometheusCollector),
    )?;
    service.start()?;

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    service.shutdown().await;
    Ok(())
}
