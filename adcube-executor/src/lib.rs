//! Query execution over cubes and over the sorted fact store.
//!
//! Both paths share the same vocabulary: vectorized AND-filtering, an
//! insertion-ordered group table keyed by group-key tuples, SELECT-ordered
//! output columns, and ORDER BY with NULLs last ascending and
//! first descending. The rollup path re-aggregates stored partial sums; the
//! fallback path accumulates raw values, which is what lets it also serve
//! MIN/MAX, LIKE, and measure comparisons. For any query both paths could
//! answer, their results agree up to floating-point summation order.

mod cube_exec;
mod derive_cols;
mod fallback;
mod filter;
mod sort;
mod value;

pub use cube_exec::execute_rollup;
pub use fallback::FallbackExecutor;
pub use filter::apply_filters;
pub use sort::sort_result;
