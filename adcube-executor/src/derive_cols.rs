//! Materialization of derivable dimensions on a cube table.
//!
//! The router plans these rewrites; here they become real columns appended
//! to the cube batch so filtering and grouping treat them like any key.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Builder, StringArray, StringBuilder};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use adcube_events::{time_dim, Dimension};
use adcube_plan::DerivedColumn;
use adcube_result::{Error, Result};

/// Append every planned derived column to `batch`.
pub fn extend_with_derived(batch: &RecordBatch, derived: &[DerivedColumn]) -> Result<RecordBatch> {
    if derived.is_empty() {
        return Ok(batch.clone());
    }

    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();

    for rewrite in derived {
        let source_index = batch
            .schema()
            .index_of(rewrite.source.name())
            .map_err(|_| {
                Error::Internal(format!(
                    "cube table is missing source column '{}'",
                    rewrite.source.name()
                ))
            })?;
        let source = batch
            .column(source_index)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| {
                Error::Internal(format!(
                    "derivation source '{}' is not a string column",
                    rewrite.source.name()
                ))
            })?;
        let array = derive_array(*rewrite, source)?;
        fields.push(Field::new(
            rewrite.target.name(),
            rewrite.target.data_type(),
            false,
        ));
        columns.push(array);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(Error::from)
}

fn derive_array(rewrite: DerivedColumn, source: &StringArray) -> Result<ArrayRef> {
    match (rewrite.source, rewrite.target) {
        (Dimension::Minute, Dimension::Day) => {
            let mut builder = StringBuilder::with_capacity(source.len(), source.len() * 10);
            for row in 0..source.len() {
                builder.append_value(time_dim::day_prefix_of_minute(source.value(row)));
            }
            Ok(Arc::new(builder.finish()))
        }
        (Dimension::Minute, Dimension::Hour) => {
            let mut builder = Int64Builder::with_capacity(source.len());
            for row in 0..source.len() {
                builder.append_value(time_dim::hour_of_minute_str(source.value(row))?);
            }
            Ok(Arc::new(builder.finish()))
        }
        (Dimension::Minute, Dimension::Week) | (Dimension::Day, Dimension::Week) => {
            let mut builder = StringBuilder::with_capacity(source.len(), source.len() * 8);
            // Minute strings repeat their day prefix; memoize the calendar
            // lookup per distinct day.
            let mut memo: Option<(String, String)> = None;
            for row in 0..source.len() {
                let day = time_dim::day_prefix_of_minute(source.value(row));
                if memo.as_ref().is_none_or(|(cached, _)| cached != day) {
                    memo = Some((day.to_string(), time_dim::week_of_day_str(day)?));
                }
                builder.append_value(&memo.as_ref().expect("set above").1);
            }
            Ok(Arc::new(builder.finish()))
        }
        (source, target) => Err(Error::Internal(format!(
            "no derivation from {} to {}",
            source.name(),
            target.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;

    fn minute_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "minute",
            DataType::Utf8,
            false,
        )]));
        RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(vec![
                "2024-06-01 14:30",
                "2024-06-03 09:05",
            ]))],
        )
        .unwrap()
    }

    #[test]
    fn derives_day_hour_and_week_from_minute() {
        let derived = extend_with_derived(
            &minute_batch(),
            &[
                DerivedColumn {
                    target: Dimension::Day,
                    source: Dimension::Minute,
                },
                DerivedColumn {
                    target: Dimension::Hour,
                    source: Dimension::Minute,
                },
                DerivedColumn {
                    target: Dimension::Week,
                    source: Dimension::Minute,
                },
            ],
        )
        .unwrap();

        let days = derived
            .column_by_name("day")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(days.value(0), "2024-06-01");
        assert_eq!(days.value(1), "2024-06-03");

        let hours = derived
            .column_by_name("hour")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(hours.value(0), 14);
        assert_eq!(hours.value(1), 9);

        let weeks = derived
            .column_by_name("week")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(weeks.value(0), "2024-W22");
        assert_eq!(weeks.value(1), "2024-W23");
    }
}
