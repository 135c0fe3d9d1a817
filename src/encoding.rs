//! Arrow encoding of market-data events.
//!
//! Each event type carries its own parquet schema through the
//! [`Record`] trait, so the recorder stays generic and no runtime
//! type dispatch is needed. Scalar strings become Utf8 columns
//! (dictionary-encoded by the writer), IDs and timestamps INT64,
//! flags Boolean, and order book sides `List<Struct<price, quantity>>`.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow::array::{
    ArrayRef, BooleanArray, Int64Array, ListBuilder, StringArray, StringBuilder, StructBuilder,
};
use arrow::datatypes::{DataType, Field, FieldRef, Fields, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::events::{AggTrade, BestPrice, OrderBookDiff, OrderBookSnapshot, PriceLevel, Trade};

/// A record shape the recorder can persist.
pub trait Record: Send + 'static {
    /// Data-type tag used in output file names.
    const DATA_TYPE: &'static str;

    /// Parquet schema for this record shape.
    fn schema() -> SchemaRef;

    /// Encode a buffered run of records as one arrow batch.
    fn to_batch(rows: &[Self]) -> Result<RecordBatch>
    where
        Self: Sized;
}

fn utf8(name: &str) -> Field {
    Field::new(name, DataType::Utf8, false)
}

fn int64(name: &str) -> Field {
    Field::new(name, DataType::Int64, false)
}

fn boolean(name: &str) -> Field {
    Field::new(name, DataType::Boolean, false)
}

fn level_fields() -> Fields {
    Fields::from(vec![utf8("price"), utf8("quantity")])
}

fn level_item_field() -> FieldRef {
    Arc::new(Field::new("item", DataType::Struct(level_fields()), true))
}

fn level_list(name: &str) -> Field {
    Field::new(name, DataType::List(level_item_field()), false)
}

fn level_list_builder(capacity: usize) -> ListBuilder<StructBuilder> {
    let values = StructBuilder::from_fields(level_fields(), capacity);
    ListBuilder::new(values).with_field(level_item_field())
}

fn append_levels(builder: &mut ListBuilder<StructBuilder>, levels: &[PriceLevel]) -> Result<()> {
    let values = builder.values();
    for level in levels {
        values
            .field_builder::<StringBuilder>(0)
            .ok_or_else(|| anyhow!("price column of level struct is not Utf8"))?
            .append_value(&level.price);
        values
            .field_builder::<StringBuilder>(1)
            .ok_or_else(|| anyhow!("quantity column of level struct is not Utf8"))?
            .append_value(&level.quantity);
        values.append(true);
    }
    builder.append(true);
    Ok(())
}

impl Record for Trade {
    const DATA_TYPE: &'static str = "trade";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_type"),
            int64("event_time"),
            int64("trade_id"),
            utf8("price"),
            utf8("quantity"),
            int64("buyer_order_id"),
            int64("seller_order_id"),
            int64("trade_time"),
            boolean("is_buyer_maker"),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.event_type.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.event_time),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.trade_id),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.price.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.quantity.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.buyer_order_id),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.seller_order_id),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.trade_time),
            )),
            Arc::new(BooleanArray::from(
                rows.iter().map(|r| r.is_buyer_maker).collect::<Vec<_>>(),
            )),
        ];
        RecordBatch::try_new(Self::schema(), columns).context("build trade record batch")
    }
}

impl Record for AggTrade {
    const DATA_TYPE: &'static str = "aggTrade";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_type"),
            int64("event_time"),
            utf8("symbol"),
            int64("agg_trade_id"),
            utf8("price"),
            utf8("quantity"),
            int64("first_trade_id"),
            int64("last_trade_id"),
            int64("trade_time"),
            boolean("is_buyer_maker"),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.event_type.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.event_time),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.symbol.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.agg_trade_id),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.price.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.quantity.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.first_trade_id),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.last_trade_id),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.trade_time),
            )),
            Arc::new(BooleanArray::from(
                rows.iter().map(|r| r.is_buyer_maker).collect::<Vec<_>>(),
            )),
        ];
        RecordBatch::try_new(Self::schema(), columns).context("build aggTrade record batch")
    }
}

impl Record for BestPrice {
    const DATA_TYPE: &'static str = "bestPrice";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_type"),
            int64("update_id"),
            utf8("symbol"),
            utf8("bid_price"),
            utf8("bid_qty"),
            utf8("ask_price"),
            utf8("ask_qty"),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.event_type.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.update_id),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.symbol.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.bid_price.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.bid_qty.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.ask_price.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.ask_qty.as_str()),
            )),
        ];
        RecordBatch::try_new(Self::schema(), columns).context("build bestPrice record batch")
    }
}

impl Record for OrderBookDiff {
    const DATA_TYPE: &'static str = "orderBookDiff";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_type"),
            int64("event_time"),
            utf8("symbol"),
            int64("first_update_id"),
            int64("final_update_id"),
            level_list("bids"),
            level_list("asks"),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let mut bids = level_list_builder(rows.len());
        let mut asks = level_list_builder(rows.len());
        for row in rows {
            append_levels(&mut bids, &row.bids)?;
            append_levels(&mut asks, &row.asks)?;
        }
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.event_type.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.event_time),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.symbol.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.first_update_id as i64),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.final_update_id as i64),
            )),
            Arc::new(bids.finish()),
            Arc::new(asks.finish()),
        ];
        RecordBatch::try_new(Self::schema(), columns).context("build orderBookDiff record batch")
    }
}

impl Record for OrderBookSnapshot {
    const DATA_TYPE: &'static str = "snapshot";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            int64("last_update_id"),
            level_list("bids"),
            level_list("asks"),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let mut bids = level_list_builder(rows.len());
        let mut asks = level_list_builder(rows.len());
        for row in rows {
            append_levels(&mut bids, &row.bids)?;
            append_levels(&mut asks, &row.asks)?;
        }
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.last_update_id as i64),
            )),
            Arc::new(bids.finish()),
            Arc::new(asks.finish()),
        ];
        RecordBatch::try_new(Self::schema(), columns).context("build snapshot record batch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, ListArray, StructArray};

    fn sample_trade(trade_id: i64) -> Trade {
        Trade {
            event_type: "trade".to_string(),
            event_time: 1700000000123,
            trade_id,
            price: "35000.10".to_string(),
            quantity: "0.002".to_string(),
            buyer_order_id: 900,
            seller_order_id: 901,
            trade_time: 1700000000120,
            is_buyer_maker: false,
        }
    }

    #[test]
    fn trade_batch_matches_schema() {
        let rows = vec![sample_trade(1), sample_trade(2)];
        let batch = Trade::to_batch(&rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), Trade::schema());
        let names: Vec<_> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names[0], "event_type");
        assert_eq!(names[8], "is_buyer_maker");
    }

    #[test]
    fn diff_batch_encodes_nested_levels() {
        let rows = vec![OrderBookDiff {
            event_type: "depthUpdate".to_string(),
            event_time: 1,
            symbol: "BTCUSDT".to_string(),
            first_update_id: 157,
            final_update_id: 160,
            bids: vec![
                PriceLevel {
                    price: "100.0".to_string(),
                    quantity: "1.0".to_string(),
                },
                PriceLevel {
                    price: "99.5".to_string(),
                    quantity: "0".to_string(),
                },
            ],
            asks: vec![PriceLevel {
                price: "101.0".to_string(),
                quantity: "2.0".to_string(),
            }],
        }];
        let batch = OrderBookDiff::to_batch(&rows).unwrap();
        assert_eq!(batch.num_rows(), 1);

        let bids = batch
            .column(5)
            .as_any()
            .downcast_ref::<ListArray>()
            .unwrap();
        let levels = bids.value(0);
        let levels = levels.as_any().downcast_ref::<StructArray>().unwrap();
        assert_eq!(levels.len(), 2);
        let prices = levels
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(prices.value(0), "100.0");
        assert_eq!(prices.value(1), "99.5");
    }

    #[test]
    fn snapshot_batch_casts_update_id_to_int64() {
        let rows = vec![OrderBookSnapshot {
            last_update_id: 12345,
            bids: vec![],
            asks: vec![],
        }];
        let batch = OrderBookSnapshot::to_batch(&rows).unwrap();
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.value(0), 12345);
    }
}
