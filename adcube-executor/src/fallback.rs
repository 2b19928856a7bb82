//! The fallback executor: the same abstract query shape, answered by
//! streaming the sorted fact store.
//!
//! This path accumulates raw values instead of stored partials, so it also
//! serves everything the cubes cannot: MIN/MAX, LIKE, comparisons on
//! measures, and aggregates over arbitrary fact columns. It must accept
//! every well-formed query; a reference to a column the fact table does not
//! have is the one thing it rejects.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, Int32Array, Int64Array, Int64Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

use adcube_events::{fact_schema, FACT_COLUMNS};
use adcube_expr::{AggregateExpr, AggregateFunc, QueryDocument, SelectItem};
use adcube_result::{Error, Result};
use adcube_store::FactStoreReader;

use crate::filter::apply_filters;
use crate::sort::sort_result;
use crate::value::{build_group_key, key_values_to_array, GroupKeyValue};

/// Executes queries against the sorted fact store.
pub struct FallbackExecutor {
    reader: FactStoreReader,
}

impl FallbackExecutor {
    pub fn new(reader: FactStoreReader) -> Self {
        Self { reader }
    }

    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Ok(Self::new(FactStoreReader::open(path)?))
    }

    /// Execute one query with a full scan of the fact table.
    pub fn execute(&self, query: &QueryDocument) -> Result<RecordBatch> {
        let schema = fact_schema();
        validate_columns(query)?;

        let key_indices = query
            .group_by
            .iter()
            .map(|column| schema.index_of(column).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;

        let plans = query
            .select
            .iter()
            .filter_map(|item| match item {
                SelectItem::Aggregate(agg) => Some(AggPlan::new(agg, &schema)),
                SelectItem::Column(_) => None,
            })
            .collect::<Result<Vec<_>>>()?;

        let mut group_index: FxHashMap<Vec<GroupKeyValue>, usize> = FxHashMap::default();
        let mut groups: Vec<(Vec<GroupKeyValue>, Vec<AggState>)> = Vec::new();

        for batch in self.reader.scan()? {
            let filtered = apply_filters(&batch?, &query.filters)?;
            if filtered.num_rows() == 0 {
                continue;
            }
            for row in 0..filtered.num_rows() {
                let key = build_group_key(&filtered, row, &key_indices)?;
                let slot = match group_index.get(&key) {
                    Some(&slot) => slot,
                    None => {
                        group_index.insert(key.clone(), groups.len());
                        groups.push((key, plans.iter().map(AggPlan::new_state).collect()));
                        groups.len() - 1
                    }
                };
                for (plan, state) in plans.iter().zip(&mut groups[slot].1) {
                    state.update(plan, &filtered, row)?;
                }
            }
        }

        let mut fields = Vec::with_capacity(query.select.len());
        let mut columns = Vec::with_capacity(query.select.len());
        let mut next_aggregate = 0usize;

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
                SelectItem::Aggregate(_) => {
                    let plan = &plans[next_aggregate];
                    let states = groups.iter().map(|(_, states)| &states[next_aggregate]);
                    let (field, column) = plan.finalize(states)?;
                    fields.push(field);
                    columns.push(column);
                    next_aggregate += 1;
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
}

/// The fact table knows these columns and nothing else.
fn validate_columns(query: &QueryDocument) -> Result<()> {
    let known = |column: &str| FACT_COLUMNS.contains(&column);
    for column in &query.group_by {
        if !known(column) {
            return Err(Error::RollupUnfit(format!(
                "unknown group_by column '{column}'"
            )));
        }
    }
    for pred in &query.filters {
        if !known(pred.column()) {
            return Err(Error::RollupUnfit(format!(
                "unknown filter column '{}'",
                pred.column()
            )));
        }
    }
    for agg in query.aggregates() {
        if !agg.is_count_star() && !known(&agg.column) {
            return Err(Error::RollupUnfit(format!(
                "unknown aggregate column '{}'",
                agg.column
            )));
        }
    }
    Ok(())
}

/// Numeric family of an aggregated column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NumKind {
    Float,
    Int,
}

/// Per-query plan for one aggregate: its column index and numeric family.
struct AggPlan {
    expr: AggregateExpr,
    column_index: Option<usize>,
    kind: NumKind,
}

impl AggPlan {
    fn new(agg: &AggregateExpr, schema: &Schema) -> Result<Self> {
        if agg.is_count_star() {
            return Ok(Self {
                expr: agg.clone(),
                column_index: None,
                kind: NumKind::Int,
            });
        }
        let index = schema.index_of(&agg.column)?;
        let kind = match schema.field(index).data_type() {
            DataType::Float64 => NumKind::Float,
            DataType::Int64 | DataType::Int32 => NumKind::Int,
            // COUNT observes nullity only, so any column type is fine.
            _ if agg.func == AggregateFunc::Count => NumKind::Int,
            other => {
                return Err(Error::QueryMalformed(format!(
                    "{} cannot aggregate a column of type {other:?}",
                    agg.header()
                )));
            }
        };
        Ok(Self {
            expr: agg.clone(),
            column_index: Some(index),
            kind,
        })
    }

    fn new_state(&self) -> AggState {
        match (self.expr.func, self.kind) {
            (AggregateFunc::Count, _) => AggState::Count { value: 0 },
            (AggregateFunc::Sum, NumKind::Float) => AggState::SumFloat { sum: 0.0, count: 0 },
            (AggregateFunc::Sum, NumKind::Int) => AggState::SumInt { sum: 0, count: 0 },
            (AggregateFunc::Avg, NumKind::Float) => AggState::AvgFloat { sum: 0.0, count: 0 },
            (AggregateFunc::Avg, NumKind::Int) => AggState::AvgInt { sum: 0, count: 0 },
            (AggregateFunc::Min, NumKind::Float) => AggState::MinFloat { value: None },
            (AggregateFunc::Min, NumKind::Int) => AggState::MinInt { value: None },
            (AggregateFunc::Max, NumKind::Float) => AggState::MaxFloat { value: None },
            (AggregateFunc::Max, NumKind::Int) => AggState::MaxInt { value: None },
        }
    }

    fn finalize<'a>(
        &self,
        states: impl ExactSizeIterator<Item = &'a AggState>,
    ) -> Result<(Field, ArrayRef)> {
        let header = self.expr.header();
        match self.new_state() {
            AggState::Count { .. } => {
                let mut builder = Int64Builder::with_capacity(states.len());
                for state in states {
                    let AggState::Count { value } = state else {
                        return Err(Error::Internal("aggregate state mismatch".into()));
                    };
                    builder.append_value(*value);
                }
                Ok((
                    Field::new(header, DataType::Int64, false),
                    Arc::new(builder.finish()),
                ))
            }
            AggState::SumFloat { .. } | AggState::AvgFloat { .. } | AggState::AvgInt { .. } => {
                let mut builder = Float64Builder::with_capacity(states.len());
                for state in states {
                    match state {
                        AggState::SumFloat { sum, count } => {
                            if *count > 0 {
                                builder.append_value(*sum);
                            } else {
                                builder.append_null();
                            }
                        }
                        AggState::AvgFloat { sum, count } => {
                            if *count > 0 {
                                builder.append_value(sum / *count as f64);
                            } else {
                                builder.append_null();
                            }
                        }
                        AggState::AvgInt { sum, count } => {
                            if *count > 0 {
                                builder.append_value(*sum as f64 / *count as f64);
                            } else {
                                builder.append_null();
                            }
                        }
                        _ => return Err(Error::Internal("aggregate state mismatch".into())),
                    }
                }
                Ok((
                    Field::new(header, DataType::Float64, true),
                    Arc::new(builder.finish()),
                ))
            }
            AggState::SumInt { .. } => {
                let mut builder = Int64Builder::with_capacity(states.len());
                for state in states {
                    let AggState::SumInt { sum, count } = state else {
                        return Err(Error::Internal("aggregate state mismatch".into()));
                    };
                    if *count > 0 {
                        builder.append_value(*sum);
                    } else {
                        builder.append_null();
                    }
                }
                Ok((
                    Field::new(header, DataType::Int64, true),
                    Arc::new(builder.finish()),
                ))
            }
            AggState::MinFloat { .. } | AggState::MaxFloat { .. } => {
                let mut builder = Float64Builder::with_capacity(states.len());
                for state in states {
                    match state {
                        AggState::MinFloat { value } | AggState::MaxFloat { value } => {
                            match value {
                                Some(v) => builder.append_value(*v),
                                None => builder.append_null(),
                            }
                        }
                        _ => return Err(Error::Internal("aggregate state mismatch".into())),
                    }
                }
                Ok((
                    Field::new(header, DataType::Float64, true),
                    Arc::new(builder.finish()),
                ))
            }
            AggState::MinInt { .. } | AggState::MaxInt { .. } => {
                let mut builder = Int64Builder::with_capacity(states.len());
                for state in states {
                    match state {
                        AggState::MinInt { value } | AggState::MaxInt { value } => match value {
                            Some(v) => builder.append_value(*v),
                            None => builder.append_null(),
                        },
                        _ => return Err(Error::Internal("aggregate state mismatch".into())),
                    }
                }
                Ok((
                    Field::new(header, DataType::Int64, true),
                    Arc::new(builder.finish()),
                ))
            }
        }
    }
}

/// Raw-value accumulator for one (group, aggregate) pair.
enum AggState {
    Count { value: i64 },
    SumFloat { sum: f64, count: i64 },
    SumInt { sum: i64, count: i64 },
    AvgFloat { sum: f64, count: i64 },
    AvgInt { sum: i64, count: i64 },
    MinFloat { value: Option<f64> },
    MaxFloat { value: Option<f64> },
    MinInt { value: Option<i64> },
    MaxInt { value: Option<i64> },
}

impl AggState {
    fn update(&mut self, plan: &AggPlan, batch: &RecordBatch, row: usize) -> Result<()> {
        match self {
            AggState::Count { value } => {
                match plan.column_index {
                    None => *value += 1,
                    Some(index) => {
                        if batch.column(index).is_valid(row) {
                            *value += 1;
                        }
                    }
                }
                Ok(())
            }
            AggState::SumFloat { sum, count } | AggState::AvgFloat { sum, count } => {
                if let Some(v) = float_at(batch, plan.column_index, row)? {
                    *sum += v;
                    *count += 1;
                }
                Ok(())
            }
            AggState::SumInt { sum, count } | AggState::AvgInt { sum, count } => {
                if let Some(v) = int_at(batch, plan.column_index, row)? {
                    *sum = sum.checked_add(v).ok_or_else(|| {
                        Error::Internal(format!("{} exceeds i64 range", plan.expr.header()))
                    })?;
                    *count += 1;
                }
                Ok(())
            }
            AggState::MinFloat { value } => {
                if let Some(v) = float_at(batch, plan.column_index, row)? {
                    *value = Some(value.map_or(v, |current| current.min(v)));
                }
                Ok(())
            }
            AggState::MaxFloat { value } => {
                if let Some(v) = float_at(batch, plan.column_index, row)? {
                    *value = Some(value.map_or(v, |current| current.max(v)));
                }
                Ok(())
            }
            AggState::MinInt { value } => {
                if let Some(v) = int_at(batch, plan.column_index, row)? {
                    *value = Some(value.map_or(v, |current| current.min(v)));
                }
                Ok(())
            }
            AggState::MaxInt { value } => {
                if let Some(v) = int_at(batch, plan.column_index, row)? {
                    *value = Some(value.map_or(v, |current| current.max(v)));
                }
                Ok(())
            }
        }
    }
}

fn float_at(batch: &RecordBatch, index: Option<usize>, row: usize) -> Result<Option<f64>> {
    let index = index.ok_or_else(|| Error::Internal("aggregate without a column".into()))?;
    let array = batch.column(index);
    if array.is_null(row) {
        return Ok(None);
    }
    let values = array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Internal("expected a float column".into()))?;
    Ok(Some(values.value(row)))
}

fn int_at(batch: &RecordBatch, index: Option<usize>, row: usize) -> Result<Option<i64>> {
    let index = index.ok_or_else(|| Error::Internal("aggregate without a column".into()))?;
    let array = batch.column(index);
    if array.is_null(row) {
        return Ok(None);
    }
    match array.data_type() {
        DataType::Int64 => {
            let values = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| Error::Internal("expected an int column".into()))?;
            Ok(Some(values.value(row)))
        }
        DataType::Int32 => {
            let values = array
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| Error::Internal("expected an int column".into()))?;
            Ok(Some(i64::from(values.value(row))))
        }
        other => Err(Error::Internal(format!(
            "expected an integer column, got {other:?}"
        ))),
    }
}
