use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

/// Raw CSV column names, in file order.
pub const EVENT_COLUMNS: [&str; 9] = [
    "ts",
    "type",
    "auction_id",
    "advertiser_id",
    "publisher_id",
    "bid_price",
    "user_id",
    "total_price",
    "country",
];

/// Columns of the sorted fact store: the raw columns plus the derived time
/// dimensions, in physical order.
pub const FACT_COLUMNS: [&str; 13] = [
    "ts",
    "type",
    "auction_id",
    "advertiser_id",
    "publisher_id",
    "bid_price",
    "user_id",
    "total_price",
    "country",
    "day",
    "hour",
    "minute",
    "week",
];

/// Schema of the raw event CSV files.
///
/// Only the two measure columns are nullable; an empty field anywhere else is
/// an input-format error, which the CSV decoder surfaces during PREPARE.
pub fn event_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("ts", DataType::Int64, false),
        Field::new("type", DataType::Utf8, false),
        Field::new("auction_id", DataType::Utf8, false),
        Field::new("advertiser_id", DataType::Int32, false),
        Field::new("publisher_id", DataType::Int32, false),
        Field::new("bid_price", DataType::Float64, true),
        Field::new("user_id", DataType::Int64, false),
        Field::new("total_price", DataType::Float64, true),
        Field::new("country", DataType::Utf8, false),
    ]))
}

/// Schema of the sorted fact store (raw columns plus derived dimensions).
pub fn fact_schema() -> SchemaRef {
    let mut fields: Vec<Field> = event_schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new("day", DataType::Utf8, false));
    fields.push(Field::new("hour", DataType::Int64, false));
    fields.push(Field::new("minute", DataType::Utf8, false));
    fields.push(Field::new("week", DataType::Utf8, false));
    Arc::new(Schema::new(fields))
}
