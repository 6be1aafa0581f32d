//! T-SQL rendering of a `QueryPlanFragment`.
//!
//! Identifiers are bracket-quoted, each table reference in FROM/JOIN may carry the
//! dirty-read hint, row limits use `TOP (n)`, and location predicates compare under an
//! accent- and case-insensitive collation.

use super::plan::{
    ColumnRef, OrderBy, OrderTarget, Operator, Predicate, PredicateValue, QueryPlanFragment, Verb,
};
use crate::config::EngineConfig;
use itertools::Itertools;

pub struct SqlRenderer {
    collation: String,
    dirty_read_hint: bool,
}

impl SqlRenderer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            collation: config.location_collation.clone(),
            dirty_read_hint: config.dirty_read_hint,
        }
    }

    pub fn render(&self, plan: &QueryPlanFragment) -> String {
        if plan.verb == Verb::Exists {
            let mut inner = vec!["SELECT 1".to_string()];
            inner.extend(self.body_clauses(plan));
            return format!(
                "SELECT CASE WHEN EXISTS ({}) THEN 1 ELSE 0 END AS [Exists]",
                inner.join(" ")
            );
        }

        let mut parts = vec![self.select_clause(plan)];
        parts.extend(self.body_clauses(plan));

        if !plan.group_by.is_empty() {
            parts.push(format!(
                "GROUP BY {}",
                plan.group_by.iter().map(quote_column).join(", ")
            ));
            if let Some(having) = &plan.having {
                parts.push(format!("HAVING COUNT(*) {} {}", having.op.sql(), having.value));
            }
        }

        if let Some(order) = &plan.order_by {
            parts.push(format!("ORDER BY {}", render_order(order)));
        }

        parts.join(" ")
    }

    fn select_clause(&self, plan: &QueryPlanFragment) -> String {
        let top = plan.limit.map(|n| format!("TOP ({}) ", n)).unwrap_or_default();
        let groups = plan.group_by.iter().map(quote_column).collect::<Vec<_>>();

        let measure = match plan.verb {
            Verb::Count => Some(match &plan.count_distinct {
                Some(key) => format!("COUNT(DISTINCT {}) AS [Count]", quote_column(key)),
                None => "COUNT(*) AS [Count]".to_string(),
            }),
            Verb::Aggregate(function) => Some(match &plan.aggregate_column {
                Some(column) => format!(
                    "{}({}) AS [{}{}]",
                    function.sql_name(),
                    quote_column(column),
                    title_case(function.sql_name()),
                    column.column
                ),
                None => "COUNT(*) AS [Count]".to_string(),
            }),
            Verb::Select | Verb::Exists => None,
        };

        let columns = match measure {
            Some(measure) => groups.into_iter().chain(std::iter::once(measure)).join(", "),
            None if plan.projection.is_empty() => format!("{}.*", quote(&plan.target_table)),
            None => plan.projection.iter().map(quote_column).join(", "),
        };
        format!("SELECT {}{}", top, columns)
    }

    /// FROM, JOINs and WHERE
    fn body_clauses(&self, plan: &QueryPlanFragment) -> Vec<String> {
        let mut parts = vec![format!("FROM {}", self.table_reference(&plan.target_table))];
        for join in &plan.joins {
            let mut clause = format!(
                "{} {} ON {} = {}",
                join.kind.sql(),
                self.table_reference(&join.to_table),
                quote_column(&ColumnRef::new(&join.to_table, &join.to_column)),
                quote_column(&ColumnRef::new(&join.from_table, &join.from_column)),
            );
            for condition in &join.conditions {
                clause.push_str(" AND ");
                clause.push_str(&self.render_predicate(condition));
            }
            parts.push(clause);
        }
        if !plan.predicates.is_empty() {
            parts.push(format!(
                "WHERE {}",
                plan.predicates.iter().map(|p| self.render_predicate(p)).join(" AND ")
            ));
        }
        parts
    }

    fn table_reference(&self, table: &str) -> String {
        if self.dirty_read_hint {
            format!("{} WITH (NOLOCK)", quote(table))
        } else {
            quote(table)
        }
    }

    pub fn render_predicate(&self, predicate: &Predicate) -> String {
        let mut column = quote_column(&predicate.column);
        if predicate.needs_collation {
            column = format!("{} COLLATE {}", column, self.collation);
        }
        let value = render_value(&predicate.value);
        match predicate.operator {
            Operator::Eq => format!("{} = {}", column, value),
            Operator::NotEq => format!("{} <> {}", column, value),
            Operator::In => format!("{} IN ({})", column, value),
            Operator::NotIn => format!("{} NOT IN ({})", column, value),
            Operator::IsNull => format!("{} IS NULL", column),
            Operator::IsNotNull => format!("{} IS NOT NULL", column),
        }
    }
}

/// `[name]`, with a schema prefix quoted part by part: `dbo.Students` -> `[dbo].[Students]`
pub fn quote(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| {
            let bare = part.trim_matches(|c| c == '[' || c == ']');
            format!("[{}]", bare.replace(']', "]]"))
        })
        .join(".")
}

pub fn quote_column(column: &ColumnRef) -> String {
    format!("{}.{}", quote(&column.table), quote(&column.column))
}

fn render_value(value: &PredicateValue) -> String {
    match value {
        PredicateValue::None => String::new(),
        PredicateValue::Integer(n) => n.to_string(),
        PredicateValue::Integers(codes) => codes.iter().join(", "),
        PredicateValue::Text(text) => quote_text(text),
        PredicateValue::Texts(texts) => texts.iter().map(|t| quote_text(t)).join(", "),
    }
}

fn quote_text(text: &str) -> String {
    format!("N'{}'", text.replace('\'', "''"))
}

fn render_order(order: &OrderBy) -> String {
    let target = match &order.target {
        OrderTarget::Column(column) => quote_column(column),
        OrderTarget::CountStar => "COUNT(*)".to_string(),
    };
    if order.descending {
        format!("{} DESC", target)
    } else {
        format!("{} ASC", target)
    }
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
