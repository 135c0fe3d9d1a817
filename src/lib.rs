//! # Binance Recorder
//!
//! Records live Binance market data (trades, aggregated trades,
//! best bid/ask, differential order book updates) to day-partitioned
//! parquet files, reconciling the diff stream against periodic REST
//! depth snapshots so the archived sequence has no gaps and no
//! duplicates.
//!
//! ## Pipeline
//! Per symbol: four WebSocket listeners and a periodic snapshot
//! fetcher feed bounded queues; a reconciler enforces update-ID
//! continuity on the diff stream; five recorders batch events into
//! `<symbol>_<dataType>_<YYYY-MM-DD>.parquet` files that rotate on
//! the UTC day boundary.
//!
//! ## Shutdown
//! SIGINT or SIGTERM cancels the shared token; tasks drain and flush
//! within a bounded grace period. A failed listener cancels the same
//! token (fail-fast), so a broken stream never records silently
//! truncated days.

pub mod binance_rest;
pub mod binance_ws;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod encoding;
pub mod events;
pub mod fileutil;
pub mod journal;
pub mod pipeline;
pub mod reconcile;
pub mod recorder;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::config::CaptureConfig;
use crate::journal::Journal;

/// Time allowed for tasks to drain and flush after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Total timeout for REST requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "binance-recorder")]
#[command(about = "Record Binance market-data streams to day-partitioned parquet files")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML capture configuration file.
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Entry point for the binary.
pub fn run() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;
    rt.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // The journal opens before anything else can fail: logger init is
    // the only error that exits non-zero, everything later is
    // journaled.
    let journal = Arc::new(Journal::open_default().context("failed to initialize logger")?);

    let config = match CaptureConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            let _ = journal.error(&format!("failed to load configuration: {err:#}"));
            return Ok(());
        }
    };
    let cancel = CancelToken::new();
    let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            let _ = journal.error(&format!("failed to build http client: {err:#}"));
            return Ok(());
        }
    };

    let mut tasks = JoinSet::new();
    let mut started = 0usize;
    for symbol in &config.symbols {
        match pipeline::start_symbol(
            &config,
            symbol,
            client.clone(),
            journal.clone(),
            cancel.clone(),
            &mut tasks,
        ) {
            Ok(()) => started += 1,
            Err(err) => {
                let _ = journal.error(&format!("failed to set up pipeline for {symbol}: {err:#}"));
            }
        }
    }
    tracing::info!("recording {started} of {} configured symbols", config.symbols.len());

    tokio::select! {
        signal = shutdown_signal() => match signal {
            Ok(()) => {
                let _ = journal.info("shutdown signal received; cancelling pipelines and closing recorders");
            }
            Err(err) => {
                let _ = journal.error(&format!("shutdown signal handler failed: {err}"));
            }
        },
        _ = cancel.cancelled() => {
            let _ = journal.error("stream failure triggered shutdown");
        }
    }
    cancel.cancel();

    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        let _ = journal.error("grace period elapsed before all tasks finished draining");
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
