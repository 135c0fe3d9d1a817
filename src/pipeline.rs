//! Per-symbol pipeline assembly.
//!
//! For each configured symbol: bounded queues, one snapshot fan-out,
//! five recorders, four listeners, the periodic fetcher, four
//! forwarding consumers, and the reconciler. A recorder that cannot
//! be opened skips the whole symbol; other symbols proceed. A failed
//! listener or a panicked task cancels the global token (fail-fast).

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::binance_rest::{run_snapshot_fetcher, SnapshotRequester};
use crate::binance_ws;
use crate::cancel::CancelToken;
use crate::config::CaptureConfig;
use crate::events::{AggTrade, BestPrice, OrderBookDiff, OrderBookSnapshot, Trade};
use crate::journal::Journal;
use crate::reconcile::run_reconciler;
use crate::recorder::{EventSink, Recorder};

/// Capacity of the per-stream event queues.
const EVENT_QUEUE_CAPACITY: usize = 100;

/// Capacity of the snapshot queues.
const SNAPSHOT_QUEUE_CAPACITY: usize = 10;

/// Wire up and spawn every task for one symbol. Fails (without
/// spawning anything) when a recorder cannot be opened.
pub fn start_symbol(
    config: &CaptureConfig,
    symbol: &str,
    client: reqwest::Client,
    journal: Arc<Journal>,
    cancel: CancelToken,
    tasks: &mut JoinSet<()>,
) -> Result<()> {
    let instrument = symbol.to_uppercase();

    let trade_recorder: Recorder<Trade> =
        Recorder::new(&config.out_dir, &instrument, config.batch_size)
            .with_context(|| format!("create trade recorder for {instrument}"))?;
    let agg_trade_recorder: Recorder<AggTrade> =
        Recorder::new(&config.out_dir, &instrument, config.batch_size)
            .with_context(|| format!("create aggTrade recorder for {instrument}"))?;
    let diff_recorder: Recorder<OrderBookDiff> =
        Recorder::new(&config.out_dir, &instrument, config.batch_size)
            .with_context(|| format!("create order book diff recorder for {instrument}"))?;
    let best_price_recorder: Recorder<BestPrice> =
        Recorder::new(&config.out_dir, &instrument, config.batch_size)
            .with_context(|| format!("create best price recorder for {instrument}"))?;
    let snapshot_recorder: Recorder<OrderBookSnapshot> =
        Recorder::new(&config.out_dir, &instrument, config.batch_size)
            .with_context(|| format!("create snapshot recorder for {instrument}"))?;

    let (trade_tx, trade_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (agg_trade_tx, agg_trade_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (diff_tx, diff_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (best_price_tx, best_price_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    // One raw snapshot queue, fanned out to the reconciler and the
    // snapshot recorder.
    let (raw_snapshot_tx, raw_snapshot_rx) = mpsc::channel(SNAPSHOT_QUEUE_CAPACITY);
    let (snapshot_diff_tx, snapshot_diff_rx) = mpsc::channel(SNAPSHOT_QUEUE_CAPACITY);
    let (snapshot_rec_tx, snapshot_rec_rx) = mpsc::channel(SNAPSHOT_QUEUE_CAPACITY);
    tasks.spawn(run_snapshot_fanout(
        cancel.clone(),
        raw_snapshot_rx,
        snapshot_diff_tx,
        snapshot_rec_tx,
    ));

    let requester = SnapshotRequester::new(
        client.clone(),
        config.rest_base.clone(),
        instrument.clone(),
        config.snapshot_limit,
        raw_snapshot_tx.clone(),
        journal.clone(),
    );

    spawn_supervised(
        tasks,
        cancel.clone(),
        journal.clone(),
        format!("trade stream for {instrument}"),
        binance_ws::listen_trade(
            cancel.clone(),
            config.stream_host.clone(),
            instrument.clone(),
            trade_tx,
        ),
    );
    spawn_supervised(
        tasks,
        cancel.clone(),
        journal.clone(),
        format!("aggTrade stream for {instrument}"),
        binance_ws::listen_agg_trade(
            cancel.clone(),
            config.stream_host.clone(),
            instrument.clone(),
            agg_trade_tx,
        ),
    );
    spawn_supervised(
        tasks,
        cancel.clone(),
        journal.clone(),
        format!("order book diff stream for {instrument}"),
        binance_ws::listen_order_book_diff(
            cancel.clone(),
            config.stream_host.clone(),
            instrument.clone(),
            diff_tx,
        ),
    );
    spawn_supervised(
        tasks,
        cancel.clone(),
        journal.clone(),
        format!("best price stream for {instrument}"),
        binance_ws::listen_best_price(
            cancel.clone(),
            config.stream_host.clone(),
            instrument.clone(),
            best_price_tx,
        ),
    );
    spawn_supervised(
        tasks,
        cancel.clone(),
        journal.clone(),
        format!("snapshot fetcher for {instrument}"),
        run_snapshot_fetcher(
            cancel.clone(),
            client,
            config.rest_base.clone(),
            instrument.clone(),
            config.snapshot_interval(),
            config.snapshot_limit,
            raw_snapshot_tx,
            journal.clone(),
        ),
    );

    tasks.spawn(run_recording_consumer(
        cancel.clone(),
        trade_rx,
        trade_recorder,
        journal.clone(),
        "trade",
    ));
    tasks.spawn(run_recording_consumer(
        cancel.clone(),
        agg_trade_rx,
        agg_trade_recorder,
        journal.clone(),
        "aggregated trade",
    ));
    tasks.spawn(run_recording_consumer(
        cancel.clone(),
        best_price_rx,
        best_price_recorder,
        journal.clone(),
        "best price",
    ));
    tasks.spawn(run_recording_consumer(
        cancel.clone(),
        snapshot_rec_rx,
        snapshot_recorder,
        journal.clone(),
        "order book snapshot",
    ));

    let reconciler_requester = requester.clone();
    tasks.spawn(run_reconciler(
        cancel.clone(),
        diff_rx,
        snapshot_diff_rx,
        diff_recorder,
        move || reconciler_requester.request(),
        journal.clone(),
    ));

    // Anchor diffs that arrive before the first periodic tick.
    requester.request();

    Ok(())
}

/// Forward snapshots from the raw queue to both consumers.
async fn run_snapshot_fanout(
    cancel: CancelToken,
    mut raw_rx: mpsc::Receiver<OrderBookSnapshot>,
    diff_tx: mpsc::Sender<OrderBookSnapshot>,
    rec_tx: mpsc::Sender<OrderBookSnapshot>,
) {
    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => return,
            snapshot = raw_rx.recv() => match snapshot {
                Some(snapshot) => snapshot,
                None => return,
            },
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = diff_tx.send(snapshot.clone()) => if sent.is_err() { return },
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = rec_tx.send(snapshot) => if sent.is_err() { return },
        }
    }
}

/// Drain one typed queue into its recorder, journaling write errors
/// per event. The recorder is closed (flushing its buffer) when the
/// queue closes or the token fires.
async fn run_recording_consumer<T, S>(
    cancel: CancelToken,
    mut rx: mpsc::Receiver<T>,
    mut sink: S,
    journal: Arc<Journal>,
    label: &'static str,
) where
    T: Send + 'static,
    S: EventSink<T> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => {
                    if let Err(err) = sink.write(record) {
                        let _ = journal.error(&format!("error writing {label}: {err:#}"));
                    }
                }
                None => break,
            }
        }
    }
    if let Err(err) = sink.close() {
        let _ = journal.error(&format!("closing {label} recorder: {err:#}"));
    }
}

/// Run a fallible task; on error or panic, journal it and cancel the
/// global token.
fn spawn_supervised<F>(
    tasks: &mut JoinSet<()>,
    cancel: CancelToken,
    journal: Arc<Journal>,
    label: String,
    task: F,
) where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tasks.spawn(async move {
        let outcome = match tokio::spawn(task).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(anyhow::anyhow!("task panicked: {join_err}")),
        };
        if let Err(err) = outcome {
            let _ = journal.error(&format!("{label} failed: {err:#}"));
            cancel.cancel();
        }
    });
}
