//! SQL generation for the statements the context issues
//!
//! Every identifier is validated against the entity type and quoted for the
//! dialect; every value becomes a positional parameter.

use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::{ModelError, OrmResult};
use crate::model::{ColumnValues, EntityType};
use crate::query::filter::Filter;
use crate::query::types::OrderBy;
use crate::query::update::UpdateSet;

/// Parameter budget of one multi-row INSERT
const MAX_PARAMS_PER_STATEMENT: usize = 999;

/// Accumulates SQL text and its positional parameters
#[derive(Debug)]
pub struct SqlWriter {
    dialect: SqlDialect,
    sql: String,
    params: Vec<DatabaseValue>,
}

impl SqlWriter {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    /// Writer continuing after caller-supplied parameters
    pub fn with_params(dialect: SqlDialect, params: Vec<DatabaseValue>) -> Self {
        Self {
            params,
            ..Self::new(dialect)
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn push_identifier(&mut self, identifier: &str) -> &mut Self {
        self.sql.push_str(&self.dialect.quote_identifier(identifier));
        self
    }

    pub fn push_param(&mut self, value: DatabaseValue) -> &mut Self {
        self.sql.push_str(&self.dialect.parameter_placeholder(self.params.len()));
        self.params.push(value);
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn finish(self) -> (String, Vec<DatabaseValue>) {
        (self.sql, self.params)
    }
}

/// What a SELECT returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Projection {
    Columns,
    Count,
    Exists,
}

/// SELECT over one entity table
#[derive(Debug, Clone)]
pub(crate) struct Select<'a> {
    pub projection: Projection,
    pub filter: &'a Filter,
    pub order: &'a [OrderBy],
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl<'a> Select<'a> {
    pub fn rows(filter: &'a Filter) -> Self {
        Self {
            projection: Projection::Columns,
            filter,
            order: &[],
            limit: None,
            offset: None,
        }
    }

    pub fn count(filter: &'a Filter) -> Self {
        Self {
            projection: Projection::Count,
            ..Self::rows(filter)
        }
    }

    pub fn exists(filter: &'a Filter) -> Self {
        Self {
            projection: Projection::Exists,
            limit: Some(1),
            ..Self::rows(filter)
        }
    }

    pub fn render(&self, w: &mut SqlWriter, entity_type: &EntityType) -> OrmResult<()> {
        w.push("SELECT ");
        match self.projection {
            Projection::Columns => {
                push_column_list(w, entity_type.columns().iter().map(|c| c.name))
            }
            Projection::Count => {
                w.push("COUNT(*)");
            }
            Projection::Exists => {
                w.push("1");
            }
        }
        w.push(" FROM ").push_identifier(entity_type.table_name());

        if !matches!(self.filter, Filter::Always) {
            w.push(" WHERE ");
            self.filter.render(w, entity_type)?;
        }

        if !self.order.is_empty() {
            w.push(" ORDER BY ");
            for (i, term) in self.order.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_identifier(entity_type.require_column(&term.column)?.name);
                w.push(&format!(" {}", term.direction));
            }
        }

        push_limit_offset(w, self.limit, self.offset);
        Ok(())
    }

    /// Parameters in placeholder order
    pub fn params(&self) -> Vec<DatabaseValue> {
        let mut params = self.filter.params();
        params.extend(self.limit.map(DatabaseValue::Int64));
        params.extend(self.offset.map(DatabaseValue::Int64));
        params
    }

    /// Cache signature of the statement
    pub fn shape(&self) -> String {
        let order: Vec<String> = self
            .order
            .iter()
            .map(|term| format!("{} {}", term.column.to_ascii_lowercase(), term.direction))
            .collect();
        format!(
            "{:?}|{}|{}|{}|{}",
            self.projection,
            self.filter.shape(),
            order.join(","),
            self.limit.is_some(),
            self.offset.is_some()
        )
    }
}

/// `LIMIT ? OFFSET ?`, with the dialect's "no limit" form when only an offset is given
pub(crate) fn push_limit_offset(w: &mut SqlWriter, limit: Option<i64>, offset: Option<i64>) {
    match (limit, offset) {
        (Some(limit), _) => {
            w.push(" LIMIT ");
            w.push_param(DatabaseValue::Int64(limit));
        }
        (None, Some(_)) => {
            w.push(match w.dialect() {
                SqlDialect::PostgreSQL => " LIMIT ALL",
                SqlDialect::SQLite => " LIMIT -1",
                SqlDialect::MySQL => " LIMIT 18446744073709551615",
            });
        }
        (None, None) => {}
    }
    if let Some(offset) = offset {
        w.push(" OFFSET ");
        w.push_param(DatabaseValue::Int64(offset));
    }
}

fn push_column_list<'c>(w: &mut SqlWriter, columns: impl Iterator<Item = &'c str>) {
    for (i, column) in columns.enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_identifier(column);
    }
}

/// Whether an INSERT should carry the key column
fn include_key(entity_type: &EntityType, values: &ColumnValues) -> bool {
    match entity_type.key_column() {
        Some(key) => values.get(key).is_some_and(|value| !value.is_null()),
        None => true,
    }
}

/// INSERT of one row; a null key is left to the store
pub(crate) fn insert(
    w: &mut SqlWriter,
    entity_type: &EntityType,
    values: &ColumnValues,
) -> OrmResult<()> {
    let with_key = include_key(entity_type, values);
    let row: Vec<(&'static str, &DatabaseValue)> = values
        .iter()
        .filter(|(name, _)| with_key || Some(*name) != entity_type.key_column())
        .map(|(name, value)| (*name, value))
        .collect();
    if row.is_empty() {
        return Err(ModelError::Validation(format!(
            "Insert into '{}' has no columns",
            entity_type.name()
        )));
    }

    w.push("INSERT INTO ").push_identifier(entity_type.table_name()).push(" (");
    push_column_list(w, row.iter().map(|(name, _)| *name));
    w.push(") VALUES (");
    for (i, (_, value)) in row.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_param((*value).clone());
    }
    w.push(")");
    Ok(())
}

/// Multi-row INSERT statements into `table`, chunked to the parameter budget
pub(crate) fn insert_batches(
    dialect: SqlDialect,
    entity_type: &EntityType,
    table: &str,
    rows: &[ColumnValues],
) -> OrmResult<Vec<(String, Vec<DatabaseValue>)>> {
    let with_key = rows.iter().any(|row| include_key(entity_type, row));
    let columns: Vec<&'static str> = entity_type
        .columns()
        .iter()
        .map(|c| c.name)
        .filter(|name| with_key || Some(*name) != entity_type.key_column())
        .collect();
    if columns.is_empty() {
        return Err(ModelError::Validation(format!(
            "Insert into '{}' has no columns",
            entity_type.name()
        )));
    }

    let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / columns.len()).max(1);
    let mut statements = Vec::with_capacity(rows.len() / rows_per_statement + 1);
    for chunk in rows.chunks(rows_per_statement) {
        let mut w = SqlWriter::new(dialect);
        w.push("INSERT INTO ").push_identifier(table).push(" (");
        push_column_list(&mut w, columns.iter().copied());
        w.push(") VALUES ");
        for (r, row) in chunk.iter().enumerate() {
            if r > 0 {
                w.push(", ");
            }
            w.push("(");
            for (c, column) in columns.iter().enumerate() {
                if c > 0 {
                    w.push(", ");
                }
                w.push_param(row.get(column).cloned().unwrap_or(DatabaseValue::Null));
            }
            w.push(")");
        }
        statements.push(w.finish());
    }
    Ok(statements)
}

/// UPDATE of the given columns of one row, addressed by key
pub(crate) fn update_columns(
    w: &mut SqlWriter,
    entity_type: &EntityType,
    values: &ColumnValues,
    columns: &[&'static str],
    key: &DatabaseValue,
) -> OrmResult<()> {
    let key_column = entity_type.require_key()?;
    w.push("UPDATE ").push_identifier(entity_type.table_name()).push(" SET ");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_identifier(column).push(" = ");
        w.push_param(values.get(column).cloned().unwrap_or(DatabaseValue::Null));
    }
    w.push(" WHERE ").push_identifier(key_column).push(" = ");
    w.push_param(key.clone());
    Ok(())
}

/// DELETE of one row by key
pub(crate) fn delete_by_key(
    w: &mut SqlWriter,
    entity_type: &EntityType,
    key: &DatabaseValue,
) -> OrmResult<()> {
    let key_column = entity_type.require_key()?;
    w.push("DELETE FROM ").push_identifier(entity_type.table_name());
    w.push(" WHERE ").push_identifier(key_column).push(" = ");
    w.push_param(key.clone());
    Ok(())
}

/// Set-based DELETE
pub(crate) fn delete_where(
    w: &mut SqlWriter,
    entity_type: &EntityType,
    filter: &Filter,
) -> OrmResult<()> {
    w.push("DELETE FROM ").push_identifier(entity_type.table_name());
    if !matches!(filter, Filter::Always) {
        w.push(" WHERE ");
        filter.render(w, entity_type)?;
    }
    Ok(())
}

/// Set-based UPDATE
pub(crate) fn update_where(
    w: &mut SqlWriter,
    entity_type: &EntityType,
    set: &UpdateSet,
    filter: &Filter,
) -> OrmResult<()> {
    w.push("UPDATE ").push_identifier(entity_type.table_name()).push(" SET ");
    set.render(w, entity_type)?;
    if !matches!(filter, Filter::Always) {
        w.push(" WHERE ");
        filter.render(w, entity_type)?;
    }
    Ok(())
}

/// CREATE TABLE IF NOT EXISTS for a registered entity
pub(crate) fn create_table(w: &mut SqlWriter, entity_type: &EntityType) -> OrmResult<()> {
    let dialect = w.dialect();
    w.push("CREATE TABLE IF NOT EXISTS ").push_identifier(entity_type.table_name()).push(" (");
    for (i, column) in entity_type.columns().iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        let is_key = Some(column.name) == entity_type.key_column();
        let type_sql = match (dialect, is_key, column.column_type) {
            (SqlDialect::PostgreSQL, true, crate::model::ColumnType::BigInt) => "BIGSERIAL",
            (SqlDialect::PostgreSQL, true, crate::model::ColumnType::Integer) => "SERIAL",
            _ => dialect.column_type_sql(column.column_type),
        };
        w.push_identifier(column.name).push(" ").push(type_sql);
        if is_key && dialect == SqlDialect::MySQL && column.column_type.is_integer() {
            w.push(" AUTO_INCREMENT");
        }
        if !column.nullable && !is_key {
            w.push(" NOT NULL");
        }
    }
    if let Some(key) = entity_type.key_column() {
        w.push(", PRIMARY KEY (").push_identifier(key).push(")");
    }
    w.push(")");
    Ok(())
}
