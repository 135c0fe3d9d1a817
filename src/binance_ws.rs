//! Binance WebSocket stream listeners.
//!
//! Four listener shapes (trade, aggTrade, order book diff, best
//! price), each a long-running task that owns one connection and
//! feeds decoded events into a bounded queue. A full queue blocks the
//! listener, so back-pressure reaches the transport instead of
//! dropping data.
//!
//! Frames arrive either raw (`{"e":...}`) or wrapped in the
//! combined-stream envelope (`{"stream":...,"data":{...}}`); decoding
//! unwraps the envelope first. Decoders are pure functions so they
//! are testable without a socket.

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::cancel::CancelToken;
use crate::events::{AggTrade, BestPrice, OrderBookDiff, Trade};

#[derive(Deserialize)]
struct CombinedFrame<'a> {
    #[serde(borrow)]
    stream: &'a str,
    #[serde(borrow)]
    data: &'a RawValue,
}

/// Unwrap the combined-stream envelope, or return the frame as-is.
fn combined_payload(frame: &str) -> &str {
    match serde_json::from_str::<CombinedFrame<'_>>(frame) {
        Ok(combined) if !combined.stream.is_empty() => combined.data.get(),
        _ => frame,
    }
}

pub(crate) fn decode_trade_frame(frame: &str) -> Result<Option<Trade>> {
    let payload = combined_payload(frame);
    let trade: Trade = serde_json::from_str(payload)
        .with_context(|| format!("unmarshal trade frame: {payload}"))?;
    // Heartbeats and other non-trade payloads slip through on this
    // stream; skip anything not tagged as a trade.
    if trade.event_type != "trade" {
        return Ok(None);
    }
    Ok(Some(trade))
}

pub(crate) fn decode_agg_trade_frame(frame: &str) -> Result<Option<AggTrade>> {
    let payload = combined_payload(frame);
    let agg_trade: AggTrade = serde_json::from_str(payload)
        .with_context(|| format!("unmarshal aggTrade frame: {payload}"))?;
    Ok(Some(agg_trade))
}

pub(crate) fn decode_diff_frame(frame: &str) -> Result<Option<OrderBookDiff>> {
    let payload = combined_payload(frame);
    let diff: OrderBookDiff = serde_json::from_str(payload)
        .with_context(|| format!("unmarshal orderBookDiff frame: {payload}"))?;
    Ok(Some(diff))
}

pub(crate) fn decode_best_price_frame(frame: &str) -> Result<Option<BestPrice>> {
    let payload = combined_payload(frame);
    let best: BestPrice = serde_json::from_str(payload)
        .with_context(|| format!("unmarshal bestPrice frame: {payload}"))?;
    Ok(Some(best))
}

/// Connect to `url`, decode each text frame, and enqueue the decoded
/// events. Returns `Ok` when cancelled or when the consumer went
/// away; any transport or decode error ends the listener with that
/// error (the supervisor then cancels the whole process).
async fn listen_stream<T, F>(
    cancel: &CancelToken,
    url: &str,
    out: &mpsc::Sender<T>,
    decode: F,
) -> Result<()>
where
    F: Fn(&str) -> Result<Option<T>>,
{
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("connect websocket: {url}"))?;
    tracing::info!("connected to {url}");
    let (mut write, mut read) = ws_stream.split();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = read.next() => next,
        };
        let msg = match next {
            Some(msg) => msg.with_context(|| format!("websocket read: {url}"))?,
            None => bail!("websocket {url} closed by peer"),
        };
        match msg {
            Message::Text(text) => {
                let Some(event) = decode(&text)? else {
                    continue;
                };
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    sent = out.send(event) => {
                        if sent.is_err() {
                            // Consumer gone; only happens during shutdown.
                            return Ok(());
                        }
                    }
                }
            }
            Message::Ping(payload) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}

pub async fn listen_trade(
    cancel: CancelToken,
    host: String,
    symbol: String,
    out: mpsc::Sender<Trade>,
) -> Result<()> {
    let url = format!("wss://{host}/ws/{}@trade", symbol.to_lowercase());
    listen_stream(&cancel, &url, &out, decode_trade_frame).await
}

pub async fn listen_agg_trade(
    cancel: CancelToken,
    host: String,
    symbol: String,
    out: mpsc::Sender<AggTrade>,
) -> Result<()> {
    let url = format!("wss://{host}/ws/{}@aggTrade", symbol.to_lowercase());
    listen_stream(&cancel, &url, &out, decode_agg_trade_frame).await
}

pub async fn listen_order_book_diff(
    cancel: CancelToken,
    host: String,
    symbol: String,
    out: mpsc::Sender<OrderBookDiff>,
) -> Result<()> {
    let url = format!("wss://{host}/ws/{}@depth", symbol.to_lowercase());
    listen_stream(&cancel, &url, &out, decode_diff_frame).await
}

pub async fn listen_best_price(
    cancel: CancelToken,
    host: String,
    symbol: String,
    out: mpsc::Sender<BestPrice>,
) -> Result<()> {
    let url = format!("wss://{host}/ws/{}@bookTicker", symbol.to_lowercase());
    listen_stream(&cancel, &url, &out, decode_best_price_frame).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADE_FRAME: &str = r#"{"e":"trade","E":1700000000123,"s":"BTCUSDT","t":42,"p":"35000.10","q":"0.002","b":900,"a":901,"T":1700000000120,"m":false}"#;

    #[test]
    fn trade_decoder_accepts_raw_frame() {
        let trade = decode_trade_frame(TRADE_FRAME).unwrap().unwrap();
        assert_eq!(trade.trade_id, 42);
    }

    #[test]
    fn trade_decoder_unwraps_combined_stream_envelope() {
        let wrapped = format!(r#"{{"stream":"btcusdt@trade","data":{TRADE_FRAME}}}"#);
        let trade = decode_trade_frame(&wrapped).unwrap().unwrap();
        assert_eq!(trade.price, "35000.10");
    }

    #[test]
    fn trade_decoder_skips_non_trade_events() {
        let heartbeat = r#"{"e":"ping","E":1700000000123,"s":"BTCUSDT","t":0,"p":"0","q":"0","T":0,"m":false}"#;
        assert!(decode_trade_frame(heartbeat).unwrap().is_none());
    }

    #[test]
    fn trade_decoder_rejects_malformed_frame() {
        assert!(decode_trade_frame(r#"{"e":"trade"}"#).is_err());
    }

    #[test]
    fn diff_decoder_parses_update_range() {
        let frame = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":157,"u":160,"b":[],"a":[["0.0026","100"]]}"#;
        let diff = decode_diff_frame(frame).unwrap().unwrap();
        assert_eq!(diff.first_update_id, 157);
        assert_eq!(diff.final_update_id, 160);
        assert_eq!(diff.asks.len(), 1);
    }

    #[test]
    fn best_price_decoder_handles_raw_book_ticker() {
        let frame = r#"{"u":400900217,"s":"BNBUSDT","b":"25.35","B":"31.21","a":"25.36","A":"40.66"}"#;
        let best = decode_best_price_frame(frame).unwrap().unwrap();
        assert_eq!(best.bid_price, "25.35");
    }
}
