//! Capture configuration.
//!
//! Loaded from a TOML file when `--config` is given; every field has
//! a default so the binary also runs with no flags at all.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Instruments to capture, e.g. ["BTCUSDT"].
    pub symbols: Vec<String>,
    /// WebSocket stream host.
    pub stream_host: String,
    /// REST API base URL for depth snapshots.
    pub rest_base: String,
    /// Seconds between periodic snapshot fetches.
    pub snapshot_interval_secs: u64,
    /// Depth levels per snapshot request.
    pub snapshot_limit: u32,
    /// Records buffered per recorder before a flush.
    pub batch_size: usize,
    /// Directory the parquet files are written into.
    pub out_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            stream_host: "data-stream.binance.vision:9443".to_string(),
            rest_base: "https://api.binance.com".to_string(),
            snapshot_interval_secs: 60,
            snapshot_limit: 100,
            batch_size: 1,
            out_dir: PathBuf::from("."),
        }
    }
}

impl CaptureConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not find config file: {path}"))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("failed to parse config: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("config lists no symbols");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.snapshot_interval_secs == 0 {
            bail!("snapshot_interval_secs must be at least 1");
        }
        Ok(())
    }
}
