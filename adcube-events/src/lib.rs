//! Event data model and row source.
//!
//! The fact table has a fixed nine-column schema; every row additionally
//! carries four time dimensions derived purely from `ts`. This
//! crate owns that schema, the [`Dimension`] vocabulary shared by the catalog
//! and the router, the dense per-row dimension codes the rollup builder
//! aggregates over, and the streaming CSV scanner that produces
//! [`EventBatch`]es.

mod scan;
mod schema;
pub mod time_dim;
mod types;

pub use scan::{EventBatch, EventScanOptions, EventScanner, EventStream};
pub use schema::{event_schema, fact_schema, EVENT_COLUMNS, FACT_COLUMNS};
pub use types::{country_code, country_from_code, Dimension, EventType};
