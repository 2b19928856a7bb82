use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all adcube operations.
///
/// Errors propagate upward with the `?` operator; the CLI surface maps them to
/// exit codes and log lines. The variants mirror the externally visible
/// failure taxonomy: prepare-time input problems, run-time catalog problems,
/// and per-query problems that must not abort the rest of a batch.
///
/// `Error` is `Send + Sync` so batches and queries can fail across threads.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file or directory operations.
    ///
    /// Fatal for PREPARE; fatal only for the affected query during RUN.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow error during columnar operations (batch construction, IPC,
    /// compute kernels, CSV encode/decode).
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error while writing or scanning the sorted fact store.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Malformed input data: bad CSV structure, an unparseable timestamp, an
    /// unknown event type, or a schema mismatch. Fatal for PREPARE.
    #[error("input format error: {0}")]
    InputFormat(String),

    /// The rollup directory is missing or incomplete at RUN start. Fatal
    /// before any query is served.
    #[error("rollup catalog absent: {0}")]
    CatalogAbsent(String),

    /// A query document violates the well-formedness rules (bare select
    /// column missing from group-by, illegal aggregate, dangling order-by
    /// reference, malformed predicate). Fatal for that query only.
    #[error("malformed query: {0}")]
    QueryMalformed(String),

    /// The query uses a feature no execution path supports, e.g. an unknown
    /// filter operator or aggregate function. Fatal for that query only.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// No cube can answer the query and the fallback also rejects it,
    /// typically because it references an unknown column. Fatal for that
    /// query only.
    #[error("query unfit for any data source: {0}")]
    RollupUnfit(String),

    /// Internal invariant violation. Should not occur during normal
    /// operation; indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an [`Error::InputFormat`] from any displayable error.
    #[inline]
    pub fn input_format<E: fmt::Display>(err: E) -> Self {
        Error::InputFormat(err.to_string())
    }

    /// Create an [`Error::QueryMalformed`] from any displayable error.
    #[inline]
    pub fn malformed<E: fmt::Display>(err: E) -> Self {
        Error::QueryMalformed(err.to_string())
    }

    /// True when the error aborts the whole RUN batch rather than a single
    /// query.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Error::CatalogAbsent(_))
    }
}
