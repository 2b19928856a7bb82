//! Re-aggregation of a cube into a query result.
//!
//! A cube row is already a group of raw events; answering a query means
//! combining cube rows down to the requested GROUP BY. Partial sums and
//! counts add, and the final SELECT formulas restore SQL NULL semantics:
//! `SUM` is NULL iff the merged non-null count is zero, `AVG` is sum over
//! count, `COUNT(col)` is the merged non-null count (never `row_count`),
//! and `COUNT(*)` is the merged `row_count`.

use std::sync::Arc;

use arrow::array::{Float64Array, Float64Builder, Int64Array, Int64Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

use adcube_expr::{AggregateExpr, AggregateFunc, QueryDocument, SelectItem};
use adcube_plan::RollupPlan;
use adcube_result::{Error, Result};

use crate::derive_cols::extend_with_derived;
use crate::filter::apply_filters;
use crate::sort::sort_result;
use crate::value::{build_group_key, key_values_to_array, GroupKeyValue};

/// Merged stored aggregates for one output group.
#[derive(Clone, Copy, Default)]
struct MergedCells {
    bid_sum: f64,
    bid_count: i64,
    total_sum: f64,
    total_count: i64,
    rows: i64,
}

/// Execute a routed query against its cube table.
pub fn execute_rollup(
    plan: &RollupPlan,
    query: &QueryDocument,
    table: &RecordBatch,
) -> Result<RecordBatch> {
    let extended = extend_with_derived(table, &plan.derived)?;
    let filtered = apply_filters(&extended, &query.filters)?;

    let schema = filtered.schema();
    let key_indices = query
        .group_by
        .iter()
        .map(|column| {
            schema.index_of(column).map_err(|_| {
                Error::Internal(format!("cube '{}' lacks group column '{column}'", plan.cube.id))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let bid_sum = stored_f64(&filtered, "bid_price_sum")?;
    let bid_count = stored_i64(&filtered, "bid_price_count")?;
    let total_sum = stored_f64(&filtered, "total_price_sum")?;
    let total_count = stored_i64(&filtered, "total_price_count")?;
    let row_count = stored_i64(&filtered, "row_count")?;

    // Insertion-ordered group table: deterministic for identical cube bits.
    let mut group_index: FxHashMap<Vec<GroupKeyValue>, usize> = FxHashMap::default();
    let mut groups: Vec<(Vec<GroupKeyValue>, MergedCells)> = Vec::new();

    for row in 0..filtered.num_rows() {
        let key = build_group_key(&filtered, row, &key_indices)?;
        let slot = match group_index.get(&key) {
            Some(&slot) => slot,
            None => {
                group_index.insert(key.clone(), groups.len());
                groups.push((key, MergedCells::default()));
                groups.len() - 1
            }
        };
        let cells = &mut groups[slot].1;
        cells.bid_sum += bid_sum.value(row);
        cells.bid_count += bid_count.value(row);
        cells.total_sum += total_sum.value(row);
        cells.total_count += total_count.value(row);
        cells.rows += row_count.value(row);
    }

    let mut fields = Vec::with_capacity(query.select.len());
    let mut columns = Vec::with_capacity(query.select.len());

    for item in &query.select {
        match item {
            SelectItem::Column(name) => {
                let pos = query
                    .group_by
                    .iter()
                    .position(|column| column == name)
                    .ok_or_else(|| {
                        Error::Internal(format!("select column '{name}' missing from group_by"))
                    })?;
                let data_type = schema.field(key_indices[pos]).data_type().clone();
                let values = groups.iter().map(|(key, _)| key[pos].clone());
                columns.push(key_values_to_array(values, &data_type)?);
                fields.push(Field::new(name, data_type, false));
            }
            SelectItem::Aggregate(agg) => {
                let (field, column) = finalize_aggregate(agg, &groups)?;
                fields.push(field);
                columns.push(column);
            }
        }
    }

    // ORDER BY may reference group columns that are not projected; carry
    // them through the sort and drop them afterwards.
    let visible = fields.len();
    for (pos, name) in query.group_by.iter().enumerate() {
        if fields.iter().any(|field| field.name() == name) {
            continue;
        }
        let data_type = schema.field(key_indices[pos]).data_type().clone();
        let values = groups.iter().map(|(key, _)| key[pos].clone());
        columns.push(key_values_to_array(values, &data_type)?);
        fields.push(Field::new(name, data_type, false));
    }

    let result = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    let sorted = sort_result(query, result)?;
    sorted
        .project(&(0..visible).collect::<Vec<_>>())
        .map_err(Error::from)
}

fn finalize_aggregate(
    agg: &AggregateExpr,
    groups: &[(Vec<GroupKeyValue>, MergedCells)],
) -> Result<(Field, arrow::array::ArrayRef)> {
    let header = agg.header();
    let measure = |cells: &MergedCells| -> Result<(f64, i64)> {
        match agg.column.as_str() {
            "bid_price" => Ok((cells.bid_sum, cells.bid_count)),
            "total_price" => Ok((cells.total_sum, cells.total_count)),
            other => Err(Error::Internal(format!(
                "cube does not store aggregates for '{other}'"
            ))),
        }
    };

    match agg.func {
        AggregateFunc::Sum => {
            let mut builder = Float64Builder::with_capacity(groups.len());
            for (_, cells) in groups {
                let (sum, count) = measure(cells)?;
                if count > 0 {
                    builder.append_value(sum);
                } else {
                    builder.append_null();
                }
            }
            Ok((
                Field::new(header, DataType::Float64, true),
                Arc::new(builder.finish()),
            ))
        }
        AggregateFunc::Avg => {
            let mut builder = Float64Builder::with_capacity(groups.len());
            for (_, cells) in groups {
                let (sum, count) = measure(cells)?;
                if count > 0 {
                    builder.append_value(sum / count as f64);
                } else {
                    builder.append_null();
                }
            }
            Ok((
                Field::new(header, DataType::Float64, true),
                Arc::new(builder.finish()),
            ))
        }
        AggregateFunc::Count => {
            let mut builder = Int64Builder::with_capacity(groups.len());
            for (_, cells) in groups {
                if agg.is_count_star() {
                    builder.append_value(cells.rows);
                } else {
                    let (_, count) = measure(cells)?;
                    builder.append_value(count);
                }
            }
            Ok((
                Field::new(header, DataType::Int64, false),
                Arc::new(builder.finish()),
            ))
        }
        AggregateFunc::Min | AggregateFunc::Max => Err(Error::Internal(format!(
            "{header} cannot be served from a cube"
        ))),
    }
}

fn stored_f64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| Error::Internal(format!("cube is missing stored column '{name}'")))
}

fn stored_i64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Internal(format!("cube is missing stored column '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcube_events::{EventScanOptions, EventScanner, EVENT_COLUMNS};
    use adcube_expr::{CompareOp, Literal, Predicate};
    use adcube_plan::{QueryPlan, QueryRouter};
    use adcube_rollup::RollupBuilder;
    use arrow::array::{Array, StringArray};
    use std::io::Write;

    /// The ten seed rows: three event types over two days and two countries.
    pub(crate) const SEED_ROWS: [&str; 10] = [
        "1717200000000,impression,a-1,1,10,1.0,42,,US",
        "1717200060000,impression,a-2,1,10,2.0,42,,US",
        "1717200120000,click,a-3,1,10,,42,,US",
        "1717200180000,purchase,a-4,1,10,,42,9.0,US",
        "1717200240000,impression,a-5,2,11,3.0,43,,JP",
        "1717286400000,impression,a-6,2,11,4.0,43,,JP",
        "1717286460000,click,a-7,2,11,,43,,JP",
        "1717286520000,purchase,a-8,2,11,,43,1.0,JP",
        "1717286580000,impression,a-9,1,10,5.0,42,,US",
        "1717286640000,purchase,a-10,1,10,,42,2.0,US",
    ];

    fn seed_cubes() -> Vec<(&'static str, RecordBatch)> {
        let dir = tempfile::TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir(&data_dir).unwrap();
        let mut file = std::fs::File::create(data_dir.join("events_0.csv")).unwrap();
        writeln!(file, "{}", EVENT_COLUMNS.join(",")).unwrap();
        for row in SEED_ROWS {
            writeln!(file, "{row}").unwrap();
        }
        drop(file);

        let mut builder = RollupBuilder::new();
        let scanner = EventScanner::new(&data_dir, EventScanOptions::default()).unwrap();
        for batch in scanner.scan() {
            builder.ingest(&batch.unwrap()).unwrap();
        }
        builder
            .finish()
            .unwrap()
            .into_iter()
            .map(|(spec, table)| (spec.id, table))
            .collect()
    }

    fn run(query: QueryDocument, cubes: &[(&'static str, RecordBatch)]) -> RecordBatch {
        let routed = QueryRouter::new().route(&query).unwrap();
        let QueryPlan::Rollup(plan) = &routed.plan else {
            panic!("expected a rollup plan");
        };
        let table = &cubes
            .iter()
            .find(|(id, _)| *id == plan.cube.id)
            .expect("cube built")
            .1;
        execute_rollup(plan, &routed.query, table).unwrap()
    }

    fn strings(batch: &RecordBatch, index: usize) -> Vec<String> {
        let array = batch
            .column(index)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        (0..array.len()).map(|i| array.value(i).to_string()).collect()
    }

    fn floats(batch: &RecordBatch, index: usize) -> Vec<Option<f64>> {
        let array = batch
            .column(index)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        (0..array.len())
            .map(|i| array.is_valid(i).then(|| array.value(i)))
            .collect()
    }

    #[test]
    fn daily_impression_spend() {
        let cubes = seed_cubes();
        let result = run(
            QueryDocument {
                select: vec![
                    SelectItem::Column("day".into()),
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Sum, "bid_price")),
                ],
                filters: vec![Predicate::Compare {
                    column: "type".into(),
                    op: CompareOp::Eq,
                    value: Literal::Str("impression".into()),
                }],
                group_by: vec!["day".into()],
                order_by: vec![adcube_expr::OrderByExpr {
                    target: "day".into(),
                    descending: false,
                }],
            },
            &cubes,
        );

        assert_eq!(result.schema().field(1).name(), "SUM(bid_price)");
        assert_eq!(strings(&result, 0), vec!["2024-06-01", "2024-06-02"]);
        assert_eq!(floats(&result, 1), vec![Some(6.0), Some(9.0)]);
    }

    #[test]
    fn sum_over_an_all_null_group_is_null() {
        let cubes = seed_cubes();
        let result = run(
            QueryDocument {
                select: vec![
                    SelectItem::Column("type".into()),
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Sum, "bid_price")),
                ],
                filters: vec![Predicate::Compare {
                    column: "type".into(),
                    op: CompareOp::Eq,
                    value: Literal::Str("click".into()),
                }],
                group_by: vec!["type".into()],
                order_by: vec![],
            },
            &cubes,
        );

        assert_eq!(result.num_rows(), 1);
        assert_eq!(strings(&result, 0), vec!["click"]);
        assert_eq!(floats(&result, 1), vec![None]);
    }

    #[test]
    fn count_star_differs_from_count_column() {
        let cubes = seed_cubes();
        let result = run(
            QueryDocument {
                select: vec![
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Count, "*")),
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Count, "bid_price")),
                ],
                filters: vec![],
                group_by: vec![],
                order_by: vec![],
            },
            &cubes,
        );

        let counts = result
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        let non_null = result
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(counts.value(0), 10);
        assert_eq!(non_null.value(0), 5);
    }

    #[test]
    fn order_by_an_unprojected_group_column() {
        let cubes = seed_cubes();
        let result = run(
            QueryDocument {
                select: vec![SelectItem::Aggregate(AggregateExpr::new(
                    AggregateFunc::Sum,
                    "bid_price",
                ))],
                filters: vec![],
                group_by: vec!["day".into()],
                order_by: vec![adcube_expr::OrderByExpr {
                    target: "day".into(),
                    descending: true,
                }],
            },
            &cubes,
        );

        assert_eq!(result.num_columns(), 1, "the sort key is not projected");
        assert_eq!(floats(&result, 0), vec![Some(9.0), Some(6.0)]);
    }

    #[test]
    fn empty_filter_result_keeps_declared_columns() {
        let cubes = seed_cubes();
        let result = run(
            QueryDocument {
                select: vec![
                    SelectItem::Column("day".into()),
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Sum, "total_price")),
                ],
                filters: vec![Predicate::Between {
                    column: "day".into(),
                    lo: Literal::Str("2031-01-01".into()),
                    hi: Literal::Str("2031-12-31".into()),
                }],
                group_by: vec!["day".into()],
                order_by: vec![],
            },
            &cubes,
        );

        assert_eq!(result.num_rows(), 0);
        assert_eq!(result.num_columns(), 2);
        assert_eq!(result.schema().field(1).name(), "SUM(total_price)");
    }

    #[test]
    fn derived_day_filter_over_the_minute_cube() {
        let cubes = seed_cubes();
        let result = run(
            QueryDocument {
                select: vec![
                    SelectItem::Column("minute".into()),
                    SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Sum, "bid_price")),
                ],
                filters: vec![
                    Predicate::Compare {
                        column: "type".into(),
                        op: CompareOp::Eq,
                        value: Literal::Str("impression".into()),
                    },
                    Predicate::Compare {
                        column: "day".into(),
                        op: CompareOp::Eq,
                        value: Literal::Str("2024-06-01".into()),
                    },
                ],
                group_by: vec!["minute".into()],
                order_by: vec![adcube_expr::OrderByExpr {
                    target: "minute".into(),
                    descending: false,
                }],
            },
            &cubes,
        );

        assert_eq!(
            strings(&result, 0),
            vec!["2024-06-01 00:00", "2024-06-01 00:01", "2024-06-01 00:04"]
        );
        assert_eq!(
            floats(&result, 1),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
    }
}
