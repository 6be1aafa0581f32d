//! Query plan fragment
//!
//! The intermediate structure between resolution and rendering. Built fresh for each
//! prompt, rendered once, then dropped.

use super::intent::{AggregateFn, HavingThreshold};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Count,
    Select,
    Aggregate(AggregateFn),
    Exists,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Count => "COUNT",
            Verb::Select => "SELECT",
            Verb::Aggregate(function) => function.sql_name(),
            Verb::Exists => "EXISTS",
        }
    }
}

/// A table-qualified column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// Brings `to_table` into the query on `to_table.to_column = from_table.from_column`,
/// ANDed with `conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStep {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub kind: JoinKind,
    /// Extra ON-clause filters; on a LEFT JOIN they restrict what counts as a match
    #[serde(default)]
    pub conditions: Vec<Predicate>,
}

impl JoinStep {
    pub fn new(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
        kind: JoinKind,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
            kind,
            conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateValue {
    None,
    Integer(i64),
    Integers(Vec<i64>),
    Text(String),
    Texts(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: ColumnRef,
    pub operator: Operator,
    pub value: PredicateValue,
    /// Compare with the accent/case-insensitive collation
    pub needs_collation: bool,
}

impl Predicate {
    pub fn is_null(column: ColumnRef) -> Self {
        Self {
            column,
            operator: Operator::IsNull,
            value: PredicateValue::None,
            needs_collation: false,
        }
    }

    pub fn is_not_null(column: ColumnRef) -> Self {
        Self {
            column,
            operator: Operator::IsNotNull,
            value: PredicateValue::None,
            needs_collation: false,
        }
    }

    /// `= code` for one code, `IN (...)` for several; negated forms for exclusions.
    pub fn codes(column: ColumnRef, mut codes: Vec<i64>, negated: bool) -> Self {
        codes.sort_unstable();
        codes.dedup();
        let (operator, value) = match (codes.len(), negated) {
            (1, false) => (Operator::Eq, PredicateValue::Integer(codes[0])),
            (1, true) => (Operator::NotEq, PredicateValue::Integer(codes[0])),
            (_, false) => (Operator::In, PredicateValue::Integers(codes)),
            (_, true) => (Operator::NotIn, PredicateValue::Integers(codes)),
        };
        Self {
            column,
            operator,
            value,
            needs_collation: false,
        }
    }

    /// Collated equality for one place, collated `IN (...)` for several; negated
    /// forms for exclusions.
    pub fn locations(column: ColumnRef, mut places: Vec<String>, negated: bool) -> Self {
        places.dedup();
        let (operator, value) = match (places.len(), negated) {
            (1, false) => (Operator::Eq, PredicateValue::Text(places.remove(0))),
            (1, true) => (Operator::NotEq, PredicateValue::Text(places.remove(0))),
            (_, false) => (Operator::In, PredicateValue::Texts(places)),
            (_, true) => (Operator::NotIn, PredicateValue::Texts(places)),
        };
        Self {
            column,
            operator,
            value,
            needs_collation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTarget {
    Column(ColumnRef),
    /// The row count of a grouped query
    CountStar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub target: OrderTarget,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlanFragment {
    pub verb: Verb,
    pub target_table: String,
    /// Selected columns; empty selects every column of the target table
    pub projection: Vec<ColumnRef>,
    /// Column under AVG/SUM/MIN/MAX
    pub aggregate_column: Option<ColumnRef>,
    /// COUNT(DISTINCT ...) key used when joins would multiply rows
    pub count_distinct: Option<ColumnRef>,
    pub joins: Vec<JoinStep>,
    pub predicates: Vec<Predicate>,
    pub group_by: Vec<ColumnRef>,
    pub having: Option<HavingThreshold>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
}

impl QueryPlanFragment {
    pub fn new(verb: Verb, target_table: impl Into<String>) -> Self {
        Self {
            verb,
            target_table: target_table.into(),
            projection: Vec::new(),
            aggregate_column: None,
            count_distinct: None,
            joins: Vec::new(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: None,
            limit: None,
        }
    }

    /// Target table followed by joined tables, in join order.
    pub fn tables(&self) -> Vec<String> {
        std::iter::once(self.target_table.clone())
            .chain(self.joins.iter().map(|j| j.to_table.clone()))
            .collect()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.target_table.eq_ignore_ascii_case(table)
            || self.joins.iter().any(|j| j.to_table.eq_ignore_ascii_case(table))
    }
}
