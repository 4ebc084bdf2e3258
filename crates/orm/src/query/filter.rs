//! Filter expressions
//!
//! A `Filter` is a predicate tree over entity columns. It renders to a WHERE
//! clause with positional parameters, and exposes a *shape* (structure and
//! columns without values) used as the plan cache key.

use std::fmt::Write as _;

use crate::backends::DatabaseValue;
use crate::error::OrmResult;
use crate::model::EntityType;
use crate::query::sql::SqlWriter;
use crate::query::types::CompareOp;

/// Predicate over the columns of one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Filter {
    /// Matches every row
    #[default]
    Always,
    Compare {
        column: String,
        op: CompareOp,
        value: DatabaseValue,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<DatabaseValue>,
        negated: bool,
    },
    Like {
        column: String,
        pattern: String,
        negated: bool,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<DatabaseValue>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(column, CompareOp::Equal, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(column, CompareOp::NotEqual, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(column, CompareOp::GreaterThan, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(column, CompareOp::GreaterThanOrEqual, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(column, CompareOp::LessThan, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self::compare(column, CompareOp::LessThanOrEqual, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Filter::IsNull {
            column: column.into(),
            negated: true,
        }
    }

    pub fn in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like {
            column: column.into(),
            pattern: pattern.into(),
            negated: false,
        }
    }

    pub fn not_like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like {
            column: column.into(),
            pattern: pattern.into(),
            negated: true,
        }
    }

    /// Conjunction; an empty list matches every row
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Disjunction; an empty list matches nothing
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Combine with another filter using AND
    pub fn and_also(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::Always, other) => other,
            (this, Filter::Always) => this,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), other) => {
                left.push(other);
                Filter::And(left)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    /// Structural signature: operators and columns, never values
    pub fn shape(&self) -> String {
        let mut out = String::new();
        self.write_shape(&mut out);
        out
    }

    fn write_shape(&self, out: &mut String) {
        match self {
            Filter::Always => out.push('*'),
            Filter::Compare { column, op, value } => match null_test(*op, value) {
                Some(negated) => write_null_shape(out, column, negated),
                None => {
                    let _ = write!(out, "({} {} ?)", column.to_ascii_lowercase(), op);
                }
            },
            Filter::IsNull { column, negated } => write_null_shape(out, column, *negated),
            Filter::In { column, values, negated } => {
                let _ = write!(
                    out,
                    "({} {}in {})",
                    column.to_ascii_lowercase(),
                    if *negated { "!" } else { "" },
                    values.len()
                );
            }
            Filter::Like { column, negated, .. } => {
                let _ = write!(
                    out,
                    "({} {}like ?)",
                    column.to_ascii_lowercase(),
                    if *negated { "!" } else { "" }
                );
            }
            Filter::And(filters) | Filter::Or(filters) => {
                out.push_str(if matches!(self, Filter::And(_)) { "and[" } else { "or[" });
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    filter.write_shape(out);
                }
                out.push(']');
            }
            Filter::Not(inner) => {
                out.push_str("not");
                inner.write_shape(out);
            }
        }
    }

    /// Parameter values, in the order `render` emits their placeholders
    pub fn params(&self) -> Vec<DatabaseValue> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        out
    }

    pub(crate) fn collect_params(&self, out: &mut Vec<DatabaseValue>) {
        match self {
            Filter::Always | Filter::IsNull { .. } => {}
            Filter::Compare { op, value, .. } => {
                if null_test(*op, value).is_none() {
                    out.push(value.clone());
                }
            }
            Filter::In { values, .. } => out.extend(values.iter().cloned()),
            Filter::Like { pattern, .. } => out.push(DatabaseValue::String(pattern.clone())),
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.collect_params(out);
                }
            }
            Filter::Not(inner) => inner.collect_params(out),
        }
    }

    /// Render as a boolean SQL expression, validating columns against the entity type
    pub(crate) fn render(&self, w: &mut SqlWriter, entity_type: &EntityType) -> OrmResult<()> {
        match self {
            Filter::Always => {
                w.push("1 = 1");
            }
            Filter::Compare { column, op, value } => {
                w.push_identifier(entity_type.require_column(column)?.name);
                match null_test(*op, value) {
                    Some(negated) => {
                        w.push(if negated { " IS NOT NULL" } else { " IS NULL" });
                    }
                    None => {
                        w.push(&format!(" {} ", op));
                        w.push_param(value.clone());
                    }
                }
            }
            Filter::IsNull { column, negated } => {
                w.push_identifier(entity_type.require_column(column)?.name);
                w.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Filter::In { column, values, negated } => {
                let column = entity_type.require_column(column)?.name;
                if values.is_empty() {
                    w.push(if *negated { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                w.push_identifier(column);
                w.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push_param(value.clone());
                }
                w.push(")");
            }
            Filter::Like { column, pattern, negated } => {
                w.push_identifier(entity_type.require_column(column)?.name);
                w.push(if *negated { " NOT LIKE " } else { " LIKE " });
                w.push_param(DatabaseValue::String(pattern.clone()));
            }
            Filter::And(filters) | Filter::Or(filters) => {
                let is_and = matches!(self, Filter::And(_));
                if filters.is_empty() {
                    w.push(if is_and { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                w.push("(");
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        w.push(if is_and { " AND " } else { " OR " });
                    }
                    filter.render(w, entity_type)?;
                }
                w.push(")");
            }
            Filter::Not(inner) => {
                w.push("NOT (");
                inner.render(w, entity_type)?;
                w.push(")");
            }
        }
        Ok(())
    }
}

/// Equality against NULL compares as `IS [NOT] NULL`; returns the negation
fn null_test(op: CompareOp, value: &DatabaseValue) -> Option<bool> {
    match (op, value) {
        (CompareOp::Equal, DatabaseValue::Null) => Some(false),
        (CompareOp::NotEqual, DatabaseValue::Null) => Some(true),
        _ => None,
    }
}

fn write_null_shape(out: &mut String, column: &str, negated: bool) {
    let _ = write!(out, "({} null{})", column.to_ascii_lowercase(), if negated { "!" } else { "" });
}
