//! Typed Binance market-data events.
//!
//! One struct per stream payload, with serde renames matching the
//! single-letter field keys of the exchange API. These are the values
//! that flow through the pipeline queues and end up in the parquet
//! files, so prices and quantities stay as the decimal strings the
//! exchange sent (no float round-trip).

use serde::{Deserialize, Deserializer};

/// One (price, quantity) entry of an order book side.
///
/// The wire form is a two-element JSON array of decimal strings.
/// Quantity "0" means the level was removed; interpreting that is a
/// downstream concern, the recorder stores the strings verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: String,
    pub quantity: String,
}

impl<'de> Deserialize<'de> for PriceLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (price, quantity) = <(String, String)>::deserialize(deserializer)?;
        Ok(Self { price, quantity })
    }
}

/// A single trade from the `<symbol>@trade` stream.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Trade {
    /// Event type (always "trade" for real trades)
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time (ms since epoch)
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Exchange trade ID
    #[serde(rename = "t")]
    pub trade_id: i64,
    /// Price
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity
    #[serde(rename = "q")]
    pub quantity: String,
    /// Buyer order ID (omitted by some stream variants)
    #[serde(rename = "b", default)]
    pub buyer_order_id: i64,
    /// Seller order ID (omitted by some stream variants)
    #[serde(rename = "a", default)]
    pub seller_order_id: i64,
    /// Trade time (ms since epoch)
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// True if the buyer was the market maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// An aggregated trade from the `<symbol>@aggTrade` stream.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AggTrade {
    /// Event type (always "aggTrade")
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time (ms since epoch)
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// Aggregate trade ID
    #[serde(rename = "a")]
    pub agg_trade_id: i64,
    /// Price
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity
    #[serde(rename = "q")]
    pub quantity: String,
    /// First trade ID covered by this aggregate
    #[serde(rename = "f")]
    pub first_trade_id: i64,
    /// Last trade ID covered by this aggregate
    #[serde(rename = "l")]
    pub last_trade_id: i64,
    /// Trade time (ms since epoch)
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// True if the buyer was the market maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// A top-of-book tick from the `<symbol>@bookTicker` stream.
///
/// The raw per-symbol stream omits the event-type tag, so it defaults
/// to empty.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BestPrice {
    /// Event type (missing on the raw bookTicker stream)
    #[serde(rename = "e", default)]
    pub event_type: String,
    /// Order book update ID
    #[serde(rename = "u")]
    pub update_id: i64,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// Best bid price
    #[serde(rename = "b")]
    pub bid_price: String,
    /// Best bid quantity
    #[serde(rename = "B")]
    pub bid_qty: String,
    /// Best ask price
    #[serde(rename = "a")]
    pub ask_price: String,
    /// Best ask quantity
    #[serde(rename = "A")]
    pub ask_qty: String,
}

/// A differential order book update from the `<symbol>@depth` stream.
///
/// Carries the contiguous update-ID range `[first_update_id,
/// final_update_id]` that the reconciler sequences against the last
/// snapshot anchor.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OrderBookDiff {
    /// Event type (always "depthUpdate")
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time (ms since epoch)
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// First update ID in this event
    #[serde(rename = "U")]
    pub first_update_id: u64,
    /// Final update ID in this event
    #[serde(rename = "u")]
    pub final_update_id: u64,
    /// Bid levels to update
    #[serde(rename = "b")]
    pub bids: Vec<PriceLevel>,
    /// Ask levels to update
    #[serde(rename = "a")]
    pub asks: Vec<PriceLevel>,
}

/// A full order book snapshot from the REST depth endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OrderBookSnapshot {
    /// Last update ID reflected in this snapshot
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    /// Bid levels, best first
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first
    pub asks: Vec<PriceLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_level_parses_two_element_array() {
        let level: PriceLevel = serde_json::from_str(r#"["100.0","1.0"]"#).unwrap();
        assert_eq!(level.price, "100.0");
        assert_eq!(level.quantity, "1.0");
    }

    #[test]
    fn price_level_rejects_wrong_arity() {
        assert!(serde_json::from_str::<PriceLevel>(r#"["100.0"]"#).is_err());
    }

    #[test]
    fn trade_parses_exchange_payload() {
        let raw = r#"{"e":"trade","E":1700000000123,"s":"BTCUSDT","t":42,"p":"35000.10","q":"0.002","b":900,"a":901,"T":1700000000120,"m":true,"M":true}"#;
        let trade: Trade = serde_json::from_str(raw).unwrap();
        assert_eq!(trade.event_type, "trade");
        assert_eq!(trade.trade_id, 42);
        assert_eq!(trade.price, "35000.10");
        assert!(trade.is_buyer_maker);
    }

    #[test]
    fn best_price_tolerates_missing_event_type() {
        let raw = r#"{"u":400900217,"s":"BNBUSDT","b":"25.35","B":"31.21","a":"25.36","A":"40.66"}"#;
        let best: BestPrice = serde_json::from_str(raw).unwrap();
        assert_eq!(best.event_type, "");
        assert_eq!(best.update_id, 400900217);
        assert_eq!(best.ask_qty, "40.66");
    }

    #[test]
    fn diff_parses_nested_levels() {
        let raw = r#"{"e":"depthUpdate","E":1700000001000,"s":"BTCUSDT","U":157,"u":160,"b":[["0.0024","10"]],"a":[["0.0026","100"],["0.0027","0"]]}"#;
        let diff: OrderBookDiff = serde_json::from_str(raw).unwrap();
        assert_eq!(diff.first_update_id, 157);
        assert_eq!(diff.final_update_id, 160);
        assert_eq!(diff.bids.len(), 1);
        assert_eq!(diff.asks[1].quantity, "0");
    }
}
