//! Unified error and result types shared by every adcube crate.

mod error;

pub use error::Error;

/// Result type alias used across the adcube workspace.
pub type Result<T> = std::result::Result<T, Error>;
