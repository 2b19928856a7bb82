//! Query routing.
//!
//! The router maps an abstract query onto either the smallest cube that can
//! answer it (with the rewrites the executor needs) or the fact-store
//! fallback. Matching is a pure function of the catalog descriptors and a
//! small derivation table; no cube-specific code exists anywhere.

mod derive;
mod router;

pub use derive::{derives, normalize_filters};
pub use router::{DerivedColumn, FallbackPlan, QueryPlan, QueryRouter, RollupPlan, RoutedQuery};
