//! ORDER BY application on a finished result table.

use arrow::compute::{lexsort_to_indices, take, SortColumn, SortOptions};
use arrow::record_batch::RecordBatch;

use adcube_expr::QueryDocument;
use adcube_result::{Error, Result};

/// Sort the result per the query's ORDER BY.
///
/// Aggregate references resolve case-insensitively to their canonical
/// headers. NULLs sort last ascending and first descending, so they land at
/// the bottom of the common descending-metric reports.
pub fn sort_result(query: &QueryDocument, batch: RecordBatch) -> Result<RecordBatch> {
    if query.order_by.is_empty() || batch.num_rows() <= 1 {
        return Ok(batch);
    }

    let schema = batch.schema();
    let mut sort_columns = Vec::with_capacity(query.order_by.len());
    for order in &query.order_by {
        let header = query.resolve_order_target(&order.target).ok_or_else(|| {
            Error::QueryMalformed(format!(
                "order_by target '{}' is not in the result",
                order.target
            ))
        })?;
        let index = schema.index_of(&header).map_err(|_| {
            Error::Internal(format!("order_by target '{header}' missing from result"))
        })?;
        sort_columns.push(SortColumn {
            values: batch.column(index).clone(),
            options: Some(SortOptions {
                descending: order.descending,
                nulls_first: order.descending,
            }),
        });
    }

    let indices = lexsort_to_indices(&sort_columns, None)?;
    let columns = batch
        .columns()
        .iter()
        .map(|column| take(column, &indices, None).map_err(Error::from))
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(schema, columns).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcube_expr::{AggregateExpr, AggregateFunc, OrderByExpr, SelectItem};
    use arrow::array::{Array, Float64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn result_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("country", DataType::Utf8, false),
            Field::new("AVG(total_price)", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["JP", "US", "DE"])),
                Arc::new(Float64Array::from(vec![Some(1.0), Some(5.5), None])),
            ],
        )
        .unwrap()
    }

    fn avg_query(order: &str, descending: bool) -> QueryDocument {
        QueryDocument {
            select: vec![
                SelectItem::Column("country".into()),
                SelectItem::Aggregate(AggregateExpr::new(AggregateFunc::Avg, "total_price")),
            ],
            filters: vec![],
            group_by: vec!["country".into()],
            order_by: vec![OrderByExpr {
                target: order.into(),
                descending,
            }],
        }
    }

    fn countries(batch: &RecordBatch) -> Vec<String> {
        let array = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        (0..array.len()).map(|i| array.value(i).to_string()).collect()
    }

    #[test]
    fn descending_aggregate_sort_puts_nulls_first() {
        let sorted = sort_result(&avg_query("avg(total_price)", true), result_batch()).unwrap();
        assert_eq!(countries(&sorted), vec!["DE", "US", "JP"]);
    }

    #[test]
    fn ascending_sort_puts_nulls_last() {
        let sorted = sort_result(&avg_query("AVG(total_price)", false), result_batch()).unwrap();
        assert_eq!(countries(&sorted), vec!["JP", "US", "DE"]);
    }

    #[test]
    fn group_column_sort_is_plain() {
        let sorted = sort_result(&avg_query("country", false), result_batch()).unwrap();
        assert_eq!(countries(&sorted), vec!["DE", "JP", "US"]);
    }
}
