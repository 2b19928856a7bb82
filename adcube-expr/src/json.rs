//! JSON wire format for query documents.
//!
//! Queries arrive as a JSON array of documents, or as an object whose
//! `queries` member holds that array. Each document looks like:
//!
//! ```json
//! {
//!   "select": ["day", {"SUM": "bid_price"}],
//!   "from": "events",
//!   "where": [{"col": "type", "op": "eq", "val": "impression"}],
//!   "group_by": ["day"],
//!   "order_by": [{"col": "day", "dir": "asc"}]
//! }
//! ```
//!
//! The `from` member is accepted and ignored; there is only one fact table.

use adcube_result::{Error, Result};
use serde_json::Value;

use crate::query::{
    AggregateExpr, AggregateFunc, CompareOp, Literal, OrderByExpr, Predicate, QueryDocument,
    SelectItem,
};

/// Decode a batch of queries from a JSON value.
pub fn parse_queries(value: &Value) -> Result<Vec<QueryDocument>> {
    let array = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("queries") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(Error::QueryMalformed(
                    "expected a JSON array of queries or an object with a 'queries' array".into(),
                ));
            }
        },
        _ => {
            return Err(Error::QueryMalformed(
                "expected a JSON array of queries".into(),
            ));
        }
    };
    array.iter().map(parse_query).collect()
}

/// Decode a single query document. The result is validated against the
/// well-formedness invariants before it is returned.
pub fn parse_query(value: &Value) -> Result<QueryDocument> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::QueryMalformed("query document must be a JSON object".into()))?;

    let mut query = QueryDocument::default();

    for item in expect_array(map.get("select"), "select")? {
        query.select.push(parse_select_item(item)?);
    }

    if let Some(filters) = map.get("where") {
        for item in expect_array(Some(filters), "where")? {
            query.filters.push(parse_predicate(item)?);
        }
    }

    if let Some(group_by) = map.get("group_by") {
        for item in expect_array(Some(group_by), "group_by")? {
            query.group_by.push(expect_string(item, "group_by entry")?);
        }
    }

    if let Some(order_by) = map.get("order_by") {
        for item in expect_array(Some(order_by), "order_by")? {
            query.order_by.push(parse_order_by(item)?);
        }
    }

    query.validate()?;
    Ok(query)
}

fn expect_array<'a>(value: Option<&'a Value>, ctx: &str) -> Result<&'a Vec<Value>> {
    value
        .and_then(Value::as_array)
        .ok_or_else(|| Error::QueryMalformed(format!("'{ctx}' must be a JSON array")))
}

fn expect_string(value: &Value, ctx: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::QueryMalformed(format!("{ctx} must be a string")))
}

fn parse_select_item(value: &Value) -> Result<SelectItem> {
    match value {
        Value::String(name) => Ok(SelectItem::Column(name.clone())),
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(Error::QueryMalformed(
                    "aggregate select entries must have exactly one function key".into(),
                ));
            }
            let (func_name, column) = map.iter().next().expect("len checked above");
            let func = AggregateFunc::parse(func_name).ok_or_else(|| {
                Error::Unsupported(format!("unknown aggregate function '{func_name}'"))
            })?;
            let column = expect_string(column, "aggregate column")?;
            Ok(SelectItem::Aggregate(AggregateExpr::new(func, column)))
        }
        _ => Err(Error::QueryMalformed(
            "select entries must be column names or {FUNC: column} objects".into(),
        )),
    }
}

fn parse_literal(value: &Value) -> Result<Literal> {
    match value {
        Value::String(s) => Ok(Literal::Str(s.clone())),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Literal::Int(v))
            } else if let Some(v) = n.as_f64() {
                Ok(Literal::Float(v))
            } else {
                Err(Error::QueryMalformed(format!(
                    "numeric literal {n} is out of range"
                )))
            }
        }
        _ => Err(Error::QueryMalformed(
            "predicate values must be strings or numbers".into(),
        )),
    }
}

fn parse_predicate(value: &Value) -> Result<Predicate> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::QueryMalformed("where entries must be JSON objects".into()))?;

    let column = expect_string(
        map.get("col")
            .ok_or_else(|| Error::QueryMalformed("where entry is missing 'col'".into()))?,
        "filter column",
    )?;
    let op = expect_string(
        map.get("op")
            .ok_or_else(|| Error::QueryMalformed("where entry is missing 'op'".into()))?,
        "filter operator",
    )?;
    let val = map
        .get("val")
        .ok_or_else(|| Error::QueryMalformed("where entry is missing 'val'".into()))?;

    let compare = |op: CompareOp| -> Result<Predicate> {
        Ok(Predicate::Compare {
            column: column.clone(),
            op,
            value: parse_literal(val)?,
        })
    };

    match op.to_ascii_lowercase().as_str() {
        "eq" => compare(CompareOp::Eq),
        "ne" | "neq" => compare(CompareOp::Neq),
        "gt" => compare(CompareOp::Gt),
        "gte" => compare(CompareOp::Gte),
        "lt" => compare(CompareOp::Lt),
        "lte" => compare(CompareOp::Lte),
        "in" => {
            let values = val
                .as_array()
                .ok_or_else(|| Error::QueryMalformed("'in' requires an array value".into()))?
                .iter()
                .map(parse_literal)
                .collect::<Result<Vec<_>>>()?;
            Ok(Predicate::In { column, values })
        }
        "between" => {
            let bounds = val
                .as_array()
                .filter(|v| v.len() == 2)
                .ok_or_else(|| {
                    Error::QueryMalformed("'between' requires a two-element array value".into())
                })?;
            Ok(Predicate::Between {
                column,
                lo: parse_literal(&bounds[0])?,
                hi: parse_literal(&bounds[1])?,
            })
        }
        "like" => Ok(Predicate::Like {
            column,
            pattern: expect_string(val, "like pattern")?,
        }),
        other => Err(Error::Unsupported(format!("unknown operator '{other}'"))),
    }
}

fn parse_order_by(value: &Value) -> Result<OrderByExpr> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::QueryMalformed("order_by entries must be JSON objects".into()))?;
    let target = expect_string(
        map.get("col")
            .ok_or_else(|| Error::QueryMalformed("order_by entry is missing 'col'".into()))?,
        "order_by column",
    )?;
    let descending = match map.get("dir") {
        None => false,
        Some(Value::String(dir)) => match dir.to_ascii_lowercase().as_str() {
            "asc" => false,
            "desc" => true,
            other => {
                return Err(Error::QueryMalformed(format!(
                    "order_by direction must be 'asc' or 'desc', got '{other}'"
                )));
            }
        },
        Some(_) => {
            return Err(Error::QueryMalformed(
                "order_by direction must be a string".into(),
            ));
        }
    };
    Ok(OrderByExpr { target, descending })
}
