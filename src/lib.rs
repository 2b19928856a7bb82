//! adcube: a two-phase OLAP rollup engine for a fixed ad-event fact table.
//!
//! `prepare` streams the raw CSV corpus once, materializing every catalog
//! cube (Arrow IPC + LZ4) and a Parquet fact store physically sorted by
//! (week, country, type). `run` answers JSON-described rollup queries in
//! milliseconds by routing each one to the smallest cube that can serve it,
//! falling back to a scan of the sorted fact store for the shapes no cube
//! covers.
//!
//! This crate re-exports the member crates under one surface and hosts the
//! two phase drivers used by the `adcube` binary.

pub mod prepare;
pub mod run;

pub use adcube_catalog as catalog;
pub use adcube_events as events;
pub use adcube_executor as executor;
pub use adcube_expr as expr;
pub use adcube_plan as plan;
pub use adcube_result as result;
pub use adcube_rollup as rollup;
pub use adcube_store as store;

pub use adcube_result::{Error, Result};
