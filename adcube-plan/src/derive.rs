//! The dimension derivation relation and filter normalization.

use adcube_events::{time_dim, Dimension};
use adcube_expr::{Literal, Predicate};
use adcube_result::Result;

/// True when `target` is computable as a pure function of `source`.
///
/// The whole relation, stated as data:
/// - `minute` carries its date and hour, so it derives `day`, `hour`, and
///   `week`;
/// - `day` derives `week` by the ISO calendar;
/// - `hour` is an hour-of-day with no date context and derives nothing.
pub fn derives(source: Dimension, target: Dimension) -> bool {
    matches!(
        (source, target),
        (
            Dimension::Minute,
            Dimension::Day | Dimension::Hour | Dimension::Week
        ) | (Dimension::Day, Dimension::Week)
    )
}

/// Normalize calendar-date literals in `day` predicates to the canonical
/// `YYYY-MM-DD` form the cubes and the fact store use, so string comparison
/// is a correct date comparison.
pub fn normalize_filters(filters: &[Predicate]) -> Result<Vec<Predicate>> {
    filters
        .iter()
        .map(|pred| {
            if pred.column() != Dimension::Day.name() {
                return Ok(pred.clone());
            }
            Ok(match pred.clone() {
                Predicate::Compare { column, op, value } => Predicate::Compare {
                    column,
                    op,
                    value: normalize_literal(value)?,
                },
                Predicate::In { column, values } => Predicate::In {
                    column,
                    values: values
                        .into_iter()
                        .map(normalize_literal)
                        .collect::<Result<Vec<_>>>()?,
                },
                Predicate::Between { column, lo, hi } => Predicate::Between {
                    column,
                    lo: normalize_literal(lo)?,
                    hi: normalize_literal(hi)?,
                },
                other @ Predicate::Like { .. } => other,
            })
        })
        .collect()
}

fn normalize_literal(value: Literal) -> Result<Literal> {
    match value {
        Literal::Str(text) => Ok(Literal::Str(time_dim::normalize_day_literal(&text)?)),
        other => Ok(other),
    }
}
