//! REST order book snapshots.
//!
//! The periodic fetcher polls the depth endpoint and feeds snapshots
//! into the raw snapshot queue; fetch errors are journaled and
//! retried on the next tick. [`SnapshotRequester`] is the on-demand
//! variant the reconciler fires on gap detection, deduplicated so a
//! burst of gaps queues at most one extra fetch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::cancel::CancelToken;
use crate::events::OrderBookSnapshot;
use crate::journal::Journal;

/// Parse the depth endpoint response body.
pub fn parse_snapshot(data: &[u8]) -> Result<OrderBookSnapshot> {
    serde_json::from_slice(data).context("parse order book snapshot")
}

/// One GET against the depth endpoint.
pub async fn fetch_snapshot(
    client: &reqwest::Client,
    rest_base: &str,
    instrument: &str,
    limit: u32,
) -> Result<OrderBookSnapshot> {
    let url = format!(
        "{rest_base}/api/v3/depth?symbol={}&limit={limit}",
        instrument.to_uppercase()
    );
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("fetch snapshot: {url}"))?;
    if response.status() != reqwest::StatusCode::OK {
        bail!("snapshot request {url} returned status {}", response.status());
    }
    let body = response.bytes().await.context("read snapshot body")?;
    parse_snapshot(&body)
}

/// Periodically fetch snapshots for `instrument` and enqueue them.
/// Fetch errors are journaled and retried on the next tick; only
/// cancellation ends the task.
#[allow(clippy::too_many_arguments)]
pub async fn run_snapshot_fetcher(
    cancel: CancelToken,
    client: reqwest::Client,
    rest_base: String,
    instrument: String,
    interval: Duration,
    limit: u32,
    out: mpsc::Sender<OrderBookSnapshot>,
    journal: Arc<Journal>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // An interval fires immediately; the pipeline already requests a
    // startup snapshot, so consume the first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        let snapshot = match fetch_snapshot(&client, &rest_base, &instrument, limit).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let _ = journal.error(&format!("snapshot fetch failed for {instrument}: {err:#}"));
                continue;
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = out.send(snapshot) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// On-demand snapshot fetch used by the reconciler on gap detection.
///
/// `request` spawns a single out-of-band fetch; while one is in
/// flight, further requests are no-ops.
#[derive(Clone)]
pub struct SnapshotRequester {
    client: reqwest::Client,
    rest_base: String,
    instrument: String,
    limit: u32,
    out: mpsc::Sender<OrderBookSnapshot>,
    journal: Arc<Journal>,
    outstanding: Arc<AtomicBool>,
}

impl SnapshotRequester {
    pub fn new(
        client: reqwest::Client,
        rest_base: String,
        instrument: String,
        limit: u32,
        out: mpsc::Sender<OrderBookSnapshot>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            client,
            rest_base,
            instrument,
            limit,
            out,
            journal,
            outstanding: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request(&self) {
        if self.outstanding.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            match fetch_snapshot(&this.client, &this.rest_base, &this.instrument, this.limit).await
            {
                Ok(snapshot) => {
                    let _ = this.out.send(snapshot).await;
                }
                Err(err) => {
                    let _ = this.journal.error(&format!(
                        "snapshot request failed for {}: {err:#}",
                        this.instrument
                    ));
                }
            }
            this.outstanding.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PriceLevel;

    #[test]
    fn parses_depth_response() {
        let raw = br#"{"lastUpdateId":12345,"bids":[["100.0","1.0"]],"asks":[["101.0","2.0"]]}"#;
        let snapshot = parse_snapshot(raw).unwrap();
        assert_eq!(snapshot.last_update_id, 12345);
        assert_eq!(
            snapshot.bids,
            vec![PriceLevel {
                price: "100.0".to_string(),
                quantity: "1.0".to_string(),
            }]
        );
        assert_eq!(
            snapshot.asks,
            vec![PriceLevel {
                price: "101.0".to_string(),
                quantity: "2.0".to_string(),
            }]
        );
    }

    #[test]
    fn rejects_malformed_levels() {
        let raw = br#"{"lastUpdateId":1,"bids":[["100.0"]],"asks":[]}"#;
        assert!(parse_snapshot(raw).is_err());
    }

    #[test]
    fn rejects_non_json_body() {
        assert!(parse_snapshot(b"<html>teapot</html>").is_err());
    }
}
