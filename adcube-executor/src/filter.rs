//! Vectorized predicate evaluation.
//!
//! Predicates AND together; each one produces a boolean mask over the batch.
//! NULL column values never satisfy a predicate (SQL three-valued logic
//! collapses to false under a WHERE). Literals coerce toward the column
//! type, so `"3"` matches an integer column and `3` matches a float column,
//! but a non-date string never silently matches a numeric column.

use arrow::array::{Array, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::compute::{and, filter_record_batch};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use adcube_expr::{CompareOp, Literal, Predicate};
use adcube_result::{Error, Result};

/// Keep the rows of `batch` satisfying every predicate.
pub fn apply_filters(batch: &RecordBatch, filters: &[Predicate]) -> Result<RecordBatch> {
    if filters.is_empty() {
        return Ok(batch.clone());
    }
    let mut mask: Option<BooleanArray> = None;
    for pred in filters {
        let next = predicate_mask(batch, pred)?;
        mask = Some(match mask {
            Some(current) => and(&current, &next)?,
            None => next,
        });
    }
    filter_record_batch(batch, &mask.expect("at least one predicate")).map_err(Error::from)
}

fn predicate_mask(batch: &RecordBatch, pred: &Predicate) -> Result<BooleanArray> {
    let column = pred.column();
    let index = batch.schema().index_of(column).map_err(|_| {
        Error::RollupUnfit(format!("filter references unknown column '{column}'"))
    })?;
    let array = batch.column(index);

    match pred {
        Predicate::Compare { op, value, .. } => compare_mask(array, *op, value, column),
        Predicate::In { values, .. } => {
            // An empty IN set selects nothing.
            let mut mask = BooleanArray::from(vec![false; array.len()]);
            for value in values {
                let next = compare_mask(array, CompareOp::Eq, value, column)?;
                mask = arrow::compute::or(&mask, &next)?;
            }
            Ok(mask)
        }
        Predicate::Between { lo, hi, .. } => {
            let lower = compare_mask(array, CompareOp::Gte, lo, column)?;
            let upper = compare_mask(array, CompareOp::Lte, hi, column)?;
            and(&lower, &upper).map_err(Error::from)
        }
        Predicate::Like { pattern, .. } => like_mask(array, pattern, column),
    }
}

fn compare_mask(
    array: &arrow::array::ArrayRef,
    op: CompareOp,
    literal: &Literal,
    column: &str,
) -> Result<BooleanArray> {
    match array.data_type() {
        DataType::Utf8 => {
            let Some(rhs) = literal.as_str() else {
                return Err(Error::QueryMalformed(format!(
                    "predicate on '{column}' requires a string value"
                )));
            };
            let values = downcast::<StringArray>(array, column)?;
            Ok(mask_by(values.len(), |row| {
                values.is_valid(row) && cmp(op, values.value(row).cmp(rhs))
            }))
        }
        DataType::Int64 => {
            let rhs = literal.as_int().ok_or_else(|| {
                Error::QueryMalformed(format!("predicate on '{column}' requires an integer value"))
            })?;
            let values = downcast::<Int64Array>(array, column)?;
            Ok(mask_by(values.len(), |row| {
                values.is_valid(row) && cmp(op, values.value(row).cmp(&rhs))
            }))
        }
        DataType::Int32 => {
            let rhs = literal.as_int().ok_or_else(|| {
                Error::QueryMalformed(format!("predicate on '{column}' requires an integer value"))
            })?;
            let values = downcast::<Int32Array>(array, column)?;
            Ok(mask_by(values.len(), |row| {
                values.is_valid(row) && cmp(op, i64::from(values.value(row)).cmp(&rhs))
            }))
        }
        DataType::Float64 => {
            let rhs = literal.as_float().ok_or_else(|| {
                Error::QueryMalformed(format!("predicate on '{column}' requires a numeric value"))
            })?;
            let values = downcast::<Float64Array>(array, column)?;
            Ok(mask_by(values.len(), |row| {
                values.is_valid(row)
                    && values
                        .value(row)
                        .partial_cmp(&rhs)
                        .is_some_and(|ordering| cmp(op, ordering))
            }))
        }
        other => Err(Error::Unsupported(format!(
            "cannot filter a column of type {other:?}"
        ))),
    }
}

fn like_mask(
    array: &arrow::array::ArrayRef,
    pattern: &str,
    column: &str,
) -> Result<BooleanArray> {
    let values = array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            Error::QueryMalformed(format!("LIKE requires a string column, '{column}' is not"))
        })?;
    Ok(mask_by(values.len(), |row| {
        values.is_valid(row) && like_match(values.value(row), pattern)
    }))
}

/// SQL LIKE with `%` (any run) and `_` (any single character).
fn like_match(text: &str, pattern: &str) -> bool {
    fn matches(text: &[u8], pattern: &[u8]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((b'%', rest)) => {
                (0..=text.len()).any(|skip| matches(&text[skip..], rest))
            }
            Some((b'_', rest)) => !text.is_empty() && matches(&text[1..], rest),
            Some((ch, rest)) => text.first() == Some(ch) && matches(&text[1..], rest),
        }
    }
    matches(text.as_bytes(), pattern.as_bytes())
}

fn mask_by(len: usize, predicate: impl Fn(usize) -> bool) -> BooleanArray {
    (0..len).map(|row| Some(predicate(row))).collect()
}

fn cmp(op: CompareOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        CompareOp::Eq => ordering == Equal,
        CompareOp::Neq => ordering != Equal,
        CompareOp::Gt => ordering == Greater,
        CompareOp::Gte => ordering != Less,
        CompareOp::Lt => ordering == Less,
        CompareOp::Lte => ordering != Greater,
    }
}

fn downcast<'a, T: 'static>(array: &'a arrow::array::ArrayRef, column: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Internal(format!("column '{column}' has an unexpected layout")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn sample() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("day", DataType::Utf8, false),
            Field::new("hour", DataType::Int64, false),
            Field::new("bid_price", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![
                    "2024-06-01",
                    "2024-06-02",
                    "2024-06-03",
                ])),
                Arc::new(Int64Array::from(vec![0, 12, 23])),
                Arc::new(Float64Array::from(vec![Some(1.0), None, Some(3.0)])),
            ],
        )
        .unwrap()
    }

    fn eq(column: &str, value: Literal) -> Predicate {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    #[test]
    fn string_between_is_inclusive() {
        let filtered = apply_filters(
            &sample(),
            &[Predicate::Between {
                column: "day".into(),
                lo: Literal::Str("2024-06-01".into()),
                hi: Literal::Str("2024-06-02".into()),
            }],
        )
        .unwrap();
        assert_eq!(filtered.num_rows(), 2);
    }

    #[test]
    fn inverted_between_selects_nothing() {
        let filtered = apply_filters(
            &sample(),
            &[Predicate::Between {
                column: "day".into(),
                lo: Literal::Str("2024-06-03".into()),
                hi: Literal::Str("2024-06-01".into()),
            }],
        )
        .unwrap();
        assert_eq!(filtered.num_rows(), 0);
    }

    #[test]
    fn empty_in_selects_nothing() {
        let filtered = apply_filters(
            &sample(),
            &[Predicate::In {
                column: "day".into(),
                values: vec![],
            }],
        )
        .unwrap();
        assert_eq!(filtered.num_rows(), 0);
    }

    #[test]
    fn null_measure_rows_never_match() {
        let filtered = apply_filters(
            &sample(),
            &[Predicate::Compare {
                column: "bid_price".into(),
                op: CompareOp::Neq,
                value: Literal::Float(1.0),
            }],
        )
        .unwrap();
        // The NULL row fails even a != comparison.
        assert_eq!(filtered.num_rows(), 1);
    }

    #[test]
    fn integer_literals_coerce_from_strings() {
        let filtered =
            apply_filters(&sample(), &[eq("hour", Literal::Str("12".into()))]).unwrap();
        assert_eq!(filtered.num_rows(), 1);
    }

    #[test]
    fn numeric_literal_against_string_column_is_malformed() {
        let result = apply_filters(&sample(), &[eq("day", Literal::Int(20_240_601))]);
        assert!(matches!(result, Err(Error::QueryMalformed(_))));
    }

    #[test]
    fn unknown_filter_column_is_unfit() {
        let result = apply_filters(&sample(), &[eq("color", Literal::Str("red".into()))]);
        assert!(matches!(result, Err(Error::RollupUnfit(_))));
    }

    #[test]
    fn like_patterns_match_sql_semantics() {
        assert!(like_match("2024-06-01", "2024-%"));
        assert!(like_match("2024-06-01", "%-01"));
        assert!(like_match("impression", "imp_ession"));
        assert!(!like_match("click", "imp%"));
        assert!(like_match("", "%"));
        assert!(!like_match("", "_"));
    }
}
