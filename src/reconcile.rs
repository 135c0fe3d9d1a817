//! Diff/snapshot reconciliation.
//!
//! The reconciler is the single consumer of one symbol's diff queue
//! and its snapshot fan-out. Snapshots re-anchor the sequence at
//! `lastUpdateId`; diffs are accepted only while their update-ID
//! ranges stay contiguous above the anchor. A gap resets the state
//! and triggers one on-demand snapshot; until the next snapshot
//! arrives every diff is dropped.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::events::{OrderBookDiff, OrderBookSnapshot};
use crate::journal::Journal;
use crate::recorder::EventSink;

/// Outcome of sequencing one diff against the reconciler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffDecision {
    /// Record the diff.
    pub accept: bool,
    /// `lastProcessedId` after this diff.
    pub next_processed_id: u64,
    /// A sequence gap was detected; the caller must re-anchor.
    pub gap: bool,
}

/// Sequence one diff against `(last_snapshot_id, last_processed_id)`.
///
/// A diff fully covered by the anchor is stale and dropped. The first
/// diff after an anchor must straddle `last_snapshot_id + 1`; every
/// later diff must start exactly at `last_processed_id + 1`.
pub fn decide(diff: &OrderBookDiff, last_snapshot_id: u64, last_processed_id: u64) -> DiffDecision {
    if diff.final_update_id <= last_snapshot_id {
        return DiffDecision {
            accept: false,
            next_processed_id: last_processed_id,
            gap: false,
        };
    }
    if last_processed_id == last_snapshot_id {
        if diff.first_update_id > last_snapshot_id + 1 {
            return DiffDecision {
                accept: false,
                next_processed_id: last_processed_id,
                gap: true,
            };
        }
    } else if diff.first_update_id != last_processed_id + 1 {
        return DiffDecision {
            accept: false,
            next_processed_id: last_processed_id,
            gap: true,
        };
    }
    DiffDecision {
        accept: true,
        next_processed_id: diff.final_update_id,
        gap: false,
    }
}

/// Consume one symbol's diff and snapshot queues, writing accepted
/// diffs to `sink` and firing `request_snapshot` on every gap.
///
/// The two queues are selected without priority: a snapshot can land
/// at any time, which is safe because re-anchoring is idempotent.
/// The reconciler itself never fails; sink errors are journaled per
/// event and the offending record is dropped.
pub async fn run_reconciler<S, F>(
    cancel: CancelToken,
    mut diff_rx: mpsc::Receiver<OrderBookDiff>,
    mut snapshot_rx: mpsc::Receiver<OrderBookSnapshot>,
    mut sink: S,
    request_snapshot: F,
    journal: Arc<Journal>,
) where
    S: EventSink<OrderBookDiff> + Send + 'static,
    F: Fn() + Send + 'static,
{
    let mut last_snapshot_id: u64 = 0;
    let mut last_processed_id: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            snapshot = snapshot_rx.recv() => {
                let Some(snapshot) = snapshot else { break };
                last_snapshot_id = snapshot.last_update_id;
                last_processed_id = snapshot.last_update_id;
                let _ = journal.info(&format!(
                    "received new snapshot with lastUpdateId {last_snapshot_id}"
                ));
            }
            diff = diff_rx.recv() => {
                let Some(diff) = diff else { break };
                if last_snapshot_id == 0 {
                    let _ = journal.info(&format!(
                        "no snapshot received yet; skipping diff with finalUpdateId {}",
                        diff.final_update_id
                    ));
                    continue;
                }
                let decision = decide(&diff, last_snapshot_id, last_processed_id);
                if decision.gap {
                    let _ = journal.error(&format!(
                        "sequence gap detected: expected {} but got {}; requesting new snapshot",
                        last_processed_id + 1,
                        diff.first_update_id
                    ));
                    request_snapshot();
                    last_snapshot_id = 0;
                    last_processed_id = 0;
                } else if decision.accept {
                    if let Err(err) = sink.write(diff) {
                        let _ = journal.error(&format!("error writing order book diff: {err:#}"));
                    }
                    last_processed_id = decision.next_processed_id;
                } else {
                    let _ = journal.info(&format!(
                        "discarded outdated diff with finalUpdateId {} (snapshot lastUpdateId {})",
                        diff.final_update_id, last_snapshot_id
                    ));
                }
            }
        }
    }

    if let Err(err) = sink.close() {
        let _ = journal.error(&format!("closing order book diff recorder: {err:#}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(first: u64, last: u64) -> OrderBookDiff {
        OrderBookDiff {
            event_type: "depthUpdate".to_string(),
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            bids: vec![],
            asks: vec![],
        }
    }

    #[test]
    fn stale_diff_is_dropped_without_gap() {
        let decision = decide(&diff(100, 100), 100, 100);
        assert_eq!(
            decision,
            DiffDecision {
                accept: false,
                next_processed_id: 100,
                gap: false,
            }
        );
    }

    #[test]
    fn first_diff_after_anchor_may_straddle_it() {
        // U <= s+1 <= u
        let decision = decide(&diff(98, 102), 100, 100);
        assert!(decision.accept);
        assert_eq!(decision.next_processed_id, 102);
    }

    #[test]
    fn first_diff_past_anchor_is_a_gap() {
        let decision = decide(&diff(102, 103), 100, 100);
        assert!(decision.gap);
        assert!(!decision.accept);
        assert_eq!(decision.next_processed_id, 100);
    }

    #[test]
    fn contiguous_diffs_advance_processed_id() {
        let first = decide(&diff(101, 101), 100, 100);
        assert!(first.accept);
        let second = decide(&diff(102, 103), 100, first.next_processed_id);
        assert!(second.accept);
        assert_eq!(second.next_processed_id, 103);
    }

    #[test]
    fn non_contiguous_followup_is_a_gap() {
        let first = decide(&diff(101, 101), 100, 100);
        assert!(first.accept);
        let second = decide(&diff(103, 103), 100, first.next_processed_id);
        assert!(second.gap);
        assert_eq!(second.next_processed_id, 101);
    }

    #[test]
    fn accepted_subsequence_is_contiguous() {
        let anchor = 100u64;
        let stream = [
            (95, 99),   // stale
            (99, 101),  // first accepted, straddles anchor
            (102, 105), // contiguous
            (106, 106), // contiguous
            (110, 112), // gap
        ];
        let mut last_processed = anchor;
        let mut accepted: Vec<(u64, u64)> = Vec::new();
        let mut gaps = 0;
        for (first, last) in stream {
            let decision = decide(&diff(first, last), anchor, last_processed);
            if decision.gap {
                gaps += 1;
            } else if decision.accept {
                accepted.push((first, last));
            }
            if decision.accept {
                last_processed = decision.next_processed_id;
            }
        }
        assert_eq!(accepted, vec![(99, 101), (102, 105), (106, 106)]);
        assert_eq!(gaps, 1);
        for pair in accepted.windows(2) {
            assert_eq!(pair[1].0, pair[0].1 + 1);
        }
    }
}
