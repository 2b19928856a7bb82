use adcube_result::{Error, Result};

/// Fact columns that legally appear under SUM/AVG/MIN/MAX.
///
/// COUNT accepts any column (it only observes nullity), so it is not
/// restricted to this list.
const NUMERIC_FACT_COLUMNS: &[&str] = &[
    "ts",
    "advertiser_id",
    "publisher_id",
    "bid_price",
    "user_id",
    "total_price",
];

/// Aggregate function in a query's SELECT list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregateFunc {
    /// Parse a function name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "COUNT" => Some(Self::Count),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            _ => None,
        }
    }

    /// Canonical upper-case name used in result headers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// One aggregate expression, e.g. `SUM(bid_price)` or `COUNT(*)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateExpr {
    pub func: AggregateFunc,
    pub column: String,
}

impl AggregateExpr {
    pub fn new(func: AggregateFunc, column: impl Into<String>) -> Self {
        Self {
            func,
            column: column.into(),
        }
    }

    pub fn is_count_star(&self) -> bool {
        self.func == AggregateFunc::Count && self.column == "*"
    }

    /// Canonical header form, e.g. `SUM(bid_price)`.
    pub fn header(&self) -> String {
        format!("{}({})", self.func.name(), self.column)
    }
}

/// Entry in a query's SELECT list.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Column(String),
    Aggregate(AggregateExpr),
}

impl SelectItem {
    /// Output column name for this item.
    pub fn header(&self) -> String {
        match self {
            SelectItem::Column(name) => name.clone(),
            SelectItem::Aggregate(agg) => agg.header(),
        }
    }
}

/// Literal value in a predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view, parsing string literals when possible.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(v) => Some(*v),
            Literal::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Literal::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Floating-point view, parsing string literals when possible.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Literal::Int(v) => Some(*v as f64),
            Literal::Float(v) => Some(*v),
            Literal::Str(s) => s.parse().ok(),
        }
    }
}

/// Scalar comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// True for the ordering comparators (`gt`, `gte`, `lt`, `lte`).
    pub fn is_ordering(&self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Neq)
    }
}

/// One WHERE predicate; predicates combine with logical AND.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Literal,
    },
    In {
        column: String,
        values: Vec<Literal>,
    },
    Between {
        column: String,
        lo: Literal,
        hi: Literal,
    },
    Like {
        column: String,
        pattern: String,
    },
}

impl Predicate {
    /// Column the predicate constrains.
    pub fn column(&self) -> &str {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Between { column, .. }
            | Predicate::Like { column, .. } => column,
        }
    }

    /// True when the predicate imposes an ordering (range) constraint.
    pub fn is_range(&self) -> bool {
        match self {
            Predicate::Compare { op, .. } => op.is_ordering(),
            Predicate::Between { .. } => true,
            _ => false,
        }
    }
}

/// One ORDER BY entry. `target` names either a group column or an aggregate
/// header such as `SUM(bid_price)`.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderByExpr {
    pub target: String,
    pub descending: bool,
}

/// The abstract query document: SELECT + WHERE + GROUP BY + ORDER BY.
#[derive(Clone, Debug, Default)]
pub struct QueryDocument {
    pub select: Vec<SelectItem>,
    pub filters: Vec<Predicate>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderByExpr>,
}

impl QueryDocument {
    /// Output headers in SELECT order.
    pub fn output_headers(&self) -> Vec<String> {
        self.select.iter().map(SelectItem::header).collect()
    }

    /// Aggregate expressions in SELECT order.
    pub fn aggregates(&self) -> impl Iterator<Item = &AggregateExpr> {
        self.select.iter().filter_map(|item| match item {
            SelectItem::Aggregate(agg) => Some(agg),
            SelectItem::Column(_) => None,
        })
    }

    /// Resolve an ORDER BY target to its canonical output header.
    ///
    /// Group columns match exactly; aggregate references match their
    /// canonical header with a case-insensitive function name, so
    /// `sum(bid_price)` resolves to `SUM(bid_price)`.
    pub fn resolve_order_target(&self, target: &str) -> Option<String> {
        if self.group_by.iter().any(|c| c == target) {
            return Some(target.to_string());
        }
        let bare = self.select.iter().any(
            |item| matches!(item, SelectItem::Column(name) if name == target),
        );
        if bare {
            return Some(target.to_string());
        }
        let canonical = canonicalize_aggregate_name(target)?;
        self.aggregates()
            .map(AggregateExpr::header)
            .find(|header| *header == canonical)
    }

    /// Enforce the query well-formedness invariants.
    ///
    /// Every bare SELECT column must appear in GROUP BY, aggregates must use
    /// a legal function/column pair, and ORDER BY may only reference columns
    /// or aggregates visible in the result.
    pub fn validate(&self) -> Result<()> {
        if self.select.is_empty() {
            return Err(Error::QueryMalformed("empty select list".into()));
        }

        for item in &self.select {
            match item {
                SelectItem::Column(name) => {
                    if !self.group_by.iter().any(|c| c == name) {
                        return Err(Error::QueryMalformed(format!(
                            "select column '{name}' is not in group_by"
                        )));
                    }
                }
                SelectItem::Aggregate(agg) => validate_aggregate(agg)?,
            }
        }

        for pred in &self.filters {
            validate_predicate(pred)?;
        }

        for order in &self.order_by {
            if self.resolve_order_target(&order.target).is_none() {
                return Err(Error::QueryMalformed(format!(
                    "order_by target '{}' is not in the select list or group_by",
                    order.target
                )));
            }
        }

        Ok(())
    }
}

/// Normalize `func(column)` text to the canonical upper-case function form.
fn canonicalize_aggregate_name(target: &str) -> Option<String> {
    let open = target.find('(')?;
    let close = target.rfind(')')?;
    if close != target.len() - 1 || close <= open {
        return None;
    }
    let func = AggregateFunc::parse(&target[..open])?;
    let column = target[open + 1..close].trim();
    Some(format!("{}({})", func.name(), column))
}

fn validate_aggregate(agg: &AggregateExpr) -> Result<()> {
    match agg.func {
        AggregateFunc::Count => {
            if agg.column.is_empty() {
                return Err(Error::QueryMalformed("COUNT of an empty column".into()));
            }
        }
        _ => {
            if agg.column == "*" {
                return Err(Error::QueryMalformed(format!(
                    "{}(*) is not a legal aggregate",
                    agg.func.name()
                )));
            }
            if !NUMERIC_FACT_COLUMNS.contains(&agg.column.as_str()) {
                return Err(Error::QueryMalformed(format!(
                    "{}({}) aggregates a non-numeric column",
                    agg.func.name(),
                    agg.column
                )));
            }
        }
    }
    Ok(())
}

fn validate_predicate(pred: &Predicate) -> Result<()> {
    match pred {
        Predicate::Compare { column, .. }
        | Predicate::In { column, .. }
        | Predicate::Between { column, .. }
        | Predicate::Like { column, .. } => {
            if column.is_empty() {
                return Err(Error::QueryMalformed("predicate with empty column".into()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_spend() -> QueryDocument {
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
            order_by: vec![],
        }
    }

    #[test]
    fn headers_use_canonical_aggregate_form() {
        let query = daily_spend();
        assert_eq!(query.output_headers(), vec!["day", "SUM(bid_price)"]);
        assert_eq!(
            AggregateExpr::new(AggregateFunc::Count, "*").header(),
            "COUNT(*)"
        );
    }

    #[test]
    fn valid_query_passes() {
        daily_spend().validate().expect("well-formed");
    }

    #[test]
    fn bare_column_must_be_grouped() {
        let mut query = daily_spend();
        query.select.push(SelectItem::Column("country".into()));
        assert!(matches!(
            query.validate(),
            Err(Error::QueryMalformed(msg)) if msg.contains("country")
        ));
    }

    #[test]
    fn sum_of_string_column_is_malformed() {
        let mut query = daily_spend();
        query.select.push(SelectItem::Aggregate(AggregateExpr::new(
            AggregateFunc::Sum,
            "country",
        )));
        assert!(query.validate().is_err());
    }

    #[test]
    fn sum_star_is_malformed() {
        let mut query = daily_spend();
        query.select = vec![SelectItem::Aggregate(AggregateExpr::new(
            AggregateFunc::Sum,
            "*",
        ))];
        assert!(query.validate().is_err());
    }

    #[test]
    fn order_by_resolves_case_insensitive_aggregates() {
        let mut query = daily_spend();
        query.order_by.push(OrderByExpr {
            target: "sum(bid_price)".into(),
            descending: true,
        });
        query.validate().expect("aggregate order target resolves");
        assert_eq!(
            query.resolve_order_target("sum(bid_price)").as_deref(),
            Some("SUM(bid_price)")
        );
    }

    #[test]
    fn order_by_unknown_target_is_malformed() {
        let mut query = daily_spend();
        query.order_by.push(OrderByExpr {
            target: "AVG(total_price)".into(),
            descending: false,
        });
        assert!(query.validate().is_err());
    }

    #[test]
    fn count_star_allowed() {
        let mut query = daily_spend();
        query.select.push(SelectItem::Aggregate(AggregateExpr::new(
            AggregateFunc::Count,
            "*",
        )));
        query.validate().expect("COUNT(*) is legal");
    }
}
