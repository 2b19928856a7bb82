//! Group keys and their conversion back into Arrow arrays.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Int32Array, Int32Builder, Int64Array, Int64Builder, StringArray,
    StringBuilder,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use adcube_result::{Error, Result};

/// One component of a group key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupKeyValue {
    Null,
    Int(i64),
    Str(String),
}

/// Extract the key tuple for one row.
pub fn build_group_key(
    batch: &RecordBatch,
    row: usize,
    key_indices: &[usize],
) -> Result<Vec<GroupKeyValue>> {
    key_indices
        .iter()
        .map(|&index| group_key_value(batch.column(index), row))
        .collect()
}

fn group_key_value(array: &ArrayRef, row: usize) -> Result<GroupKeyValue> {
    if array.is_null(row) {
        return Ok(GroupKeyValue::Null);
    }
    match array.data_type() {
        DataType::Utf8 => {
            let values = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::Internal("group column is not Utf8".into()))?;
            Ok(GroupKeyValue::Str(values.value(row).to_string()))
        }
        DataType::Int64 => {
            let values = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| Error::Internal("group column is not Int64".into()))?;
            Ok(GroupKeyValue::Int(values.value(row)))
        }
        DataType::Int32 => {
            let values = array
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| Error::Internal("group column is not Int32".into()))?;
            Ok(GroupKeyValue::Int(i64::from(values.value(row))))
        }
        other => Err(Error::Unsupported(format!(
            "cannot group by a column of type {other:?}"
        ))),
    }
}

/// Rebuild a key column from per-group values.
pub fn key_values_to_array(
    values: impl ExactSizeIterator<Item = GroupKeyValue>,
    data_type: &DataType,
) -> Result<ArrayRef> {
    match data_type {
        DataType::Utf8 => {
            let mut builder = StringBuilder::with_capacity(values.len(), values.len() * 8);
            for value in values {
                match value {
                    GroupKeyValue::Str(s) => builder.append_value(s),
                    GroupKeyValue::Null => builder.append_null(),
                    GroupKeyValue::Int(v) => builder.append_value(v.to_string()),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    GroupKeyValue::Int(v) => builder.append_value(v),
                    GroupKeyValue::Null => builder.append_null(),
                    GroupKeyValue::Str(_) => {
                        return Err(Error::Internal(
                            "string key value in an integer group column".into(),
                        ));
                    }
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Int32 => {
            let mut builder = Int32Builder::with_capacity(values.len());
            for value in values {
                match value {
                    GroupKeyValue::Int(v) => builder.append_value(v as i32),
                    GroupKeyValue::Null => builder.append_null(),
                    GroupKeyValue::Str(_) => {
                        return Err(Error::Internal(
                            "string key value in an integer group column".into(),
                        ));
                    }
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        other => Err(Error::Internal(format!(
            "cannot rebuild a group column of type {other:?}"
        ))),
    }
}
