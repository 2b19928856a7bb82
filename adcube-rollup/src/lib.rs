//! Single-pass streaming rollup builder.
//!
//! One sweep over the event stream materializes every catalog cube at once.
//! Each cube keeps an accumulator map from its packed key tuple to the five
//! aggregate cells; batches fold into all accumulators in parallel, and a
//! periodic housekeeping fold rebuilds the hash indexes to keep the resident
//! footprint bounded. Merging is associative and commutative, so the final
//! cube contents are independent of how the stream was batched.

mod accumulator;
mod builder;
mod cells;

pub use accumulator::CubeAccumulator;
pub use builder::{RollupBuilder, DEFAULT_FOLD_EVERY};
pub use cells::AggCells;
