use adcube_catalog::{CubeSpec, CATALOG};
use adcube_events::Dimension;
use adcube_expr::{AggregateFunc, QueryDocument, SelectItem};
use adcube_result::Result;

use crate::derive::{derives, normalize_filters};

/// Measure columns whose partial aggregates the cubes store.
const MEASURE_COLUMNS: [&str; 2] = ["bid_price", "total_price"];

/// A rewrite step: materialize `target` from the cube's `source` key before
/// filtering and re-aggregating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedColumn {
    pub target: Dimension,
    pub source: Dimension,
}

/// Plan for answering a query from one cube.
#[derive(Debug)]
pub struct RollupPlan {
    pub cube: &'static CubeSpec,
    pub derived: Vec<DerivedColumn>,
}

/// Plan for answering a query from the sorted fact store.
#[derive(Debug)]
pub struct FallbackPlan {
    /// Why no cube could serve the query; surfaced in logs.
    pub reason: String,
}

/// The router's decision.
#[derive(Debug)]
pub enum QueryPlan {
    Rollup(RollupPlan),
    Fallback(FallbackPlan),
}

impl QueryPlan {
    /// Data-source label for the run summary (`cube id` or `fallback`).
    pub fn source_label(&self) -> &str {
        match self {
            QueryPlan::Rollup(plan) => plan.cube.id,
            QueryPlan::Fallback(_) => "fallback",
        }
    }
}

/// A query with its filters normalized, paired with the chosen plan.
#[derive(Debug)]
pub struct RoutedQuery {
    pub query: QueryDocument,
    pub plan: QueryPlan,
}

/// Routes queries onto the cube catalog.
pub struct QueryRouter;

impl Default for QueryRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRouter {
    pub fn new() -> Self {
        tracing::debug!(cubes = CATALOG.len(), "query router initialized");
        QueryRouter
    }

    /// Decide how to answer `query`.
    ///
    /// The decision scans the catalog once, so it is O(cubes); the returned
    /// query has its date literals normalized for either execution path.
    pub fn route(&self, query: &QueryDocument) -> Result<RoutedQuery> {
        let mut query = query.clone();
        query.filters = normalize_filters(&query.filters)?;

        if let Some(reason) = fallback_reason(&query) {
            tracing::info!(reason = %reason, "routing to fallback");
            return Ok(RoutedQuery {
                query,
                plan: QueryPlan::Fallback(FallbackPlan { reason }),
            });
        }

        // All group-by and filter columns are dimensions here.
        let mut required: Vec<Dimension> = Vec::new();
        let mut push_dim = |dim: Dimension| {
            if !required.contains(&dim) {
                required.push(dim);
            }
        };
        for column in &query.group_by {
            push_dim(Dimension::parse(column).expect("checked by fallback_reason"));
        }
        for pred in &query.filters {
            push_dim(Dimension::parse(pred.column()).expect("checked by fallback_reason"));
        }

        let mut best: Option<&'static CubeSpec> = None;
        for spec in CATALOG {
            if !required.iter().all(|dim| cube_provides(spec, *dim)) {
                continue;
            }
            if best.is_none_or(|current| spec.expected_rows < current.expected_rows) {
                best = Some(spec);
            }
        }

        let Some(cube) = best else {
            let reason = format!(
                "no cube covers dimensions {:?}",
                required.iter().map(Dimension::name).collect::<Vec<_>>()
            );
            tracing::info!(reason = %reason, "routing to fallback");
            return Ok(RoutedQuery {
                query,
                plan: QueryPlan::Fallback(FallbackPlan { reason }),
            });
        };

        let derived = required
            .iter()
            .filter(|dim| !cube.has_key(**dim))
            .map(|dim| DerivedColumn {
                target: *dim,
                source: cube
                    .keys
                    .iter()
                    .copied()
                    .find(|key| derives(*key, *dim))
                    .expect("cube_provides guarantees a source"),
            })
            .collect();

        tracing::info!(cube = cube.id, rows = cube.expected_rows, "routed to cube");
        Ok(RoutedQuery {
            query,
            plan: QueryPlan::Rollup(RollupPlan { cube, derived }),
        })
    }
}

fn cube_provides(spec: &CubeSpec, dim: Dimension) -> bool {
    spec.has_key(dim) || spec.keys.iter().any(|key| derives(*key, dim))
}

/// A reason this query cannot be served from any cube, or `None` when cube
/// matching should proceed.
fn fallback_reason(query: &QueryDocument) -> Option<String> {
    for item in &query.select {
        let SelectItem::Aggregate(agg) = item else {
            continue;
        };
        match agg.func {
            AggregateFunc::Min | AggregateFunc::Max => {
                return Some(format!("{} needs raw values", agg.header()));
            }
            AggregateFunc::Count => {
                if !agg.is_count_star() && !MEASURE_COLUMNS.contains(&agg.column.as_str()) {
                    return Some(format!("cubes do not store {}", agg.header()));
                }
            }
            AggregateFunc::Sum | AggregateFunc::Avg => {
                if !MEASURE_COLUMNS.contains(&agg.column.as_str()) {
                    return Some(format!("cubes do not store {}", agg.header()));
                }
            }
        }
    }

    for pred in &query.filters {
        if matches!(pred, adcube_expr::Predicate::Like { .. }) {
            return Some(format!("LIKE on '{}' needs raw values", pred.column()));
        }
        if MEASURE_COLUMNS.contains(&pred.column()) && pred.is_range() {
            return Some(format!(
                "range predicate on measure '{}' needs raw values",
                pred.column()
            ));
        }
        if Dimension::parse(pred.column()).is_none() {
            return Some(format!("'{}' is not a cube dimension", pred.column()));
        }
    }

    for column in &query.group_by {
        if Dimension::parse(column).is_none() {
            return Some(format!("group_by column '{column}' is not a cube dimension"));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcube_expr::{AggregateExpr, CompareOp, Literal, Predicate};

    fn query(
        select: Vec<SelectItem>,
        filters: Vec<Predicate>,
        group_by: Vec<&str>,
    ) -> QueryDocument {
        QueryDocument {
            select,
            filters,
            group_by: group_by.into_iter().map(String::from).collect(),
            order_by: vec![],
        }
    }

    fn eq(column: &str, value: &str) -> Predicate {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value: Literal::Str(value.into()),
        }
    }

    fn sum(column: &str) -> SelectItem {
        SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Sum, column))
    }

    fn routed_cube(routed: &RoutedQuery) -> Option<&'static str> {
        match &routed.plan {
            QueryPlan::Rollup(plan) => Some(plan.cube.id),
            QueryPlan::Fallback(_) => None,
        }
    }

    #[test]
    fn group_by_day_with_type_filter_uses_day_type() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("day".into()), sum("bid_price")],
                vec![eq("type", "impression")],
                vec!["day"],
            ))
            .unwrap();
        assert_eq!(routed_cube(&routed), Some("day_type"));
    }

    #[test]
    fn extra_filter_dimension_forces_a_wider_cube() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("day".into()), sum("bid_price")],
                vec![eq("type", "impression"), eq("country", "JP")],
                vec!["day"],
            ))
            .unwrap();
        assert_eq!(routed_cube(&routed), Some("day_country_type"));
    }

    #[test]
    fn publisher_country_day_routes_to_the_wide_cube() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("publisher_id".into()), sum("bid_price")],
                vec![
                    eq("type", "impression"),
                    eq("country", "JP"),
                    Predicate::Between {
                        column: "day".into(),
                        lo: Literal::Str("2024-06-01".into()),
                        hi: Literal::Str("2024-06-02".into()),
                    },
                ],
                vec!["publisher_id"],
            ))
            .unwrap();
        assert_eq!(routed_cube(&routed), Some("day_publisher_country_type"));
    }

    #[test]
    fn smallest_matching_cube_wins() {
        // `country` alone matches country_type (48 rows) among others.
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("country".into()), sum("total_price")],
                vec![eq("type", "purchase")],
                vec!["country"],
            ))
            .unwrap();
        assert_eq!(routed_cube(&routed), Some("country_type"));
    }

    #[test]
    fn week_group_by_derives_from_the_week_cube_directly() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("week".into()), sum("bid_price")],
                vec![eq("type", "serve")],
                vec!["week"],
            ))
            .unwrap();
        assert_eq!(routed_cube(&routed), Some("week_type"));
    }

    #[test]
    fn day_filter_on_minute_group_by_plans_a_derivation() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("minute".into()), sum("bid_price")],
                vec![eq("type", "impression"), eq("day", "2024-06-01")],
                vec!["minute"],
            ))
            .unwrap();
        match &routed.plan {
            QueryPlan::Rollup(plan) => {
                assert_eq!(plan.cube.id, "minute_type");
                assert_eq!(
                    plan.derived,
                    vec![DerivedColumn {
                        target: Dimension::Day,
                        source: Dimension::Minute,
                    }]
                );
            }
            QueryPlan::Fallback(_) => panic!("expected a rollup plan"),
        }
    }

    #[test]
    fn hour_does_not_derive_day() {
        // day × hour has no covering cube: hour cubes lack date context and
        // day cubes lack the hour.
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![
                    SelectItem::Column("day".into()),
                    SelectItem::Column("hour".into()),
                    sum("bid_price"),
                ],
                vec![],
                vec!["day", "hour"],
            ))
            .unwrap();
        assert!(routed_cube(&routed).is_none());
    }

    #[test]
    fn min_max_force_fallback() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![
                    SelectItem::Column("day".into()),
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Max, "bid_price")),
                ],
                vec![],
                vec!["day"],
            ))
            .unwrap();
        assert!(routed_cube(&routed).is_none());
    }

    #[test]
    fn measure_range_predicates_force_fallback() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("day".into()), sum("bid_price")],
                vec![Predicate::Compare {
                    column: "bid_price".into(),
                    op: CompareOp::Gt,
                    value: Literal::Float(1.0),
                }],
                vec!["day"],
            ))
            .unwrap();
        assert!(routed_cube(&routed).is_none());
    }

    #[test]
    fn aggregates_over_unstored_columns_force_fallback() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![
                    SelectItem::Column("day".into()),
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Count, "country")),
                ],
                vec![],
                vec!["day"],
            ))
            .unwrap();
        assert!(routed_cube(&routed).is_none());
    }

    #[test]
    fn route_normalizes_day_literals() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(
                vec![SelectItem::Column("day".into()), sum("bid_price")],
                vec![eq("day", "2024-6-1"), eq("type", "impression")],
                vec!["day"],
            ))
            .unwrap();
        assert!(matches!(
            &routed.query.filters[0],
            Predicate::Compare { value: Literal::Str(v), .. } if v == "2024-06-01"
        ));
    }

    #[test]
    fn no_dimensions_at_all_uses_the_smallest_cube() {
        let router = QueryRouter::new();
        let routed = router
            .route(&query(vec![sum("bid_price")], vec![], vec![]))
            .unwrap();
        assert_eq!(routed_cube(&routed), Some("country_type"));
    }
}
