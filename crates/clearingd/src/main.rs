//! Clearing Ledger Daemon
//!
//! Composition root for the clearing network's ledger service: opens
//! the durable store, restores balances into the in-memory ledger,
//! starts the write-behind backup scheduler, and serves the HTTP API.
//! On shutdown the ledger flushes one final full backup pass before
//! the store closes, so no balance is lost.

use anyhow::{Context, Result};
use clap::Parser;
use ledger_core::{Ledger, LedgerConfig};
use ledger_http::HttpService;
use ledger_store::LedgerStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::DaemonConfig;

/// Interbank clearing ledger daemon
#[derive(Parser, Debug)]
#[command(name = "clearingd")]
#[command(about = "In-memory balance ledger with write-behind persistence", long_about = None)]
struct Args {
    /// HTTP bind address
    #[arg(long, default_value_t = DaemonConfig::default().listen_addr)]
    listen_addr: String,

    /// Sled data directory
    #[arg(long, default_value_t = DaemonConfig::default().data_dir)]
    data_dir: String,

    /// Backup flush interval in milliseconds
    #[arg(long, default_value_t = DaemonConfig::default().backup_interval_ms)]
    backup_interval_ms: u64,

    /// Seconds between status log lines
    #[arg(long, default_value_t = DaemonConfig::default().status_interval_secs)]
    status_interval: u64,

    /// Include per-account balances in the status log
    #[arg(long)]
    with_accounts: bool,
}

impl Args {
    fn into_config(self) -> DaemonConfig {
        DaemonConfig {
            listen_addr: self.listen_addr,
            data_dir: self.data_dir,
            backup_interval_ms: self.backup_interval_ms,
            status_interval_secs: self.status_interval,
            status_with_accounts: self.with_accounts,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config();
    tracing::info!(?config, "starting clearingd");

    // Durable store and initial load
    let store = Arc::new(LedgerStore::open(&config.data_dir).context("opening ledger store")?);
    let banks = store.load_banks().context("loading bank balances")?;
    let accounts = store.load_accounts().context("loading account balances")?;

    let ledger = Arc::new(Ledger::new(LedgerConfig {
        backup_interval: Duration::from_millis(config.backup_interval_ms),
    }));
    ledger.restore(banks, accounts);

    // Persistence consumer on a dedicated thread; exits once the
    // backup channels disconnect.
    let channels = ledger
        .take_backup_channels()
        .context("backup channels already taken")?;
    let consumer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || store.run(channels))
    };

    ledger.start();

    // Periodic status log
    let status_ledger = Arc::clone(&ledger);
    let status_interval = Duration::from_secs(config.status_interval_secs.max(1));
    let with_accounts = config.status_with_accounts;
    let status_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(status_interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            tracing::info!(
                processed = status_ledger.processed(),
                banks = status_ledger.bank_count(),
                "\n{}",
                status_ledger.balances_summary(with_accounts)
            );
        }
    });

    // Serve until ctrl-c
    let http = HttpService::new(Arc::clone(&ledger));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .context("binding listen address")?;
    tracing::info!("HTTP service listening on {}", config.listen_addr);

    http.serve_with_shutdown(listener, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("signal received");
    })
    .await?;

    // Ledger first, so the final backup pass reaches the channels
    tracing::info!("shutting down, flushing final backup pass");
    ledger.close().await;
    status_task.abort();
    let _ = status_task.await;

    // Dropping the last ledger handle drops the channel senders,
    // which ends the consumer loop and flushes sled.
    drop(ledger);
    if consumer.join().is_err() {
        tracing::error!("store consumer thread panicked");
    }

    tracing::info!("clearingd stopped");
    Ok(())
}
