//! Core Database Backend Traits
//!
//! The persistence context never talks to a driver directly. It goes through
//! `DatabasePool` and `DatabaseTransaction`, binds parameters as
//! `DatabaseValue`s and reads results through `DatabaseRow`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::backends::DatabaseBackendType;
use crate::error::{ModelError, OrmError, OrmResult};
use crate::model::ColumnType;

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row within the transaction
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>>;

    /// Execute a batch and return the rows of each statement separately
    async fn fetch_result_sets(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        Ok(vec![self.fetch_all(sql, params).await?])
    }

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Backend behind this pool
    fn backend_type(&self) -> DatabaseBackendType;

    /// SQL dialect used to render statements for this pool
    fn sql_dialect(&self) -> SqlDialect {
        self.backend_type().dialect()
    }

    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Execute a statement directly on the pool
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return result rows directly on the pool
    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row directly on the pool
    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>>;

    /// Execute a batch and return the rows of each statement separately
    async fn fetch_result_sets(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        Ok(vec![self.fetch_all(sql, params).await?])
    }

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;

    /// Get pool statistics
    fn stats(&self) -> DatabasePoolStats;
}

/// Database pool statistics
#[derive(Debug, Clone, Default)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue>;

    /// Get column count
    fn column_count(&self) -> usize;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Convert row to JSON value
    fn to_json(&self) -> OrmResult<JsonValue> {
        let mut map = serde_json::Map::new();
        for (index, name) in self.column_names().into_iter().enumerate() {
            map.insert(name, self.get_by_index(index)?.to_json());
        }
        Ok(JsonValue::Object(map))
    }

    /// Convert row to HashMap
    fn to_map(&self) -> OrmResult<HashMap<String, DatabaseValue>> {
        let mut map = HashMap::new();
        for (index, name) in self.column_names().into_iter().enumerate() {
            map.insert(name, self.get_by_index(index)?);
        }
        Ok(map)
    }
}

/// Extension trait for DatabaseRow to support typed column access
pub trait DatabaseRowExt {
    /// Get a typed value from a column
    fn get<T>(&self, column: &str) -> Result<T, ModelError>
    where
        T: for<'de> serde::Deserialize<'de>;

    /// Try to get an optional typed value from a column
    fn try_get<T>(&self, column: &str) -> Result<Option<T>, ModelError>
    where
        T: for<'de> serde::Deserialize<'de>;
}

impl<R: DatabaseRow + ?Sized> DatabaseRowExt for R {
    fn get<T>(&self, column: &str) -> Result<T, ModelError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let db_value = self.get_by_name(column)?;
        serde_json::from_value(db_value.to_json()).map_err(|e| column_error(column, e))
    }

    fn try_get<T>(&self, column: &str) -> Result<Option<T>, ModelError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.get_by_name(column) {
            Ok(db_value) if db_value.is_null() => Ok(None),
            Ok(db_value) => serde_json::from_value(db_value.to_json())
                .map(Some)
                .map_err(|e| column_error(column, e)),
            Err(ModelError::ColumnNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn column_error(column: &str, error: serde_json::Error) -> ModelError {
    ModelError::Serialization(format!("Failed to deserialize column '{}': {}", column, error))
}

/// Row materialized from a driver row: column names and their values
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
    columns: Arc<[String]>,
    values: Vec<DatabaseValue>,
}

impl ValueRow {
    pub fn new(columns: Arc<[String]>, values: Vec<DatabaseValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn into_values(self) -> Vec<DatabaseValue> {
        self.values
    }
}

impl DatabaseRow for ValueRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        self.values
            .get(index)
            .cloned()
            .ok_or_else(|| ModelError::ColumnNotFound(format!("#{}", index)))
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .map(|index| self.values[index].clone())
            .ok_or_else(|| ModelError::ColumnNotFound(name.to_string()))
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.to_vec()
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float32(f) => serde_json::Number::from_f64(*f as f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => {
                JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect())
            }
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Time(t) => JsonValue::String(t.to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Create a DatabaseValue from an untyped JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => DatabaseValue::String(s),
            other => DatabaseValue::Json(other),
        }
    }

    /// Create a DatabaseValue from JSON, guided by the declared column type
    pub fn from_json_typed(json: JsonValue, column_type: ColumnType) -> OrmResult<Self> {
        if json.is_null() {
            return Ok(DatabaseValue::Null);
        }
        let mismatch = |json: &JsonValue| {
            ModelError::Serialization(format!(
                "Value {} does not fit a {:?} column",
                json, column_type
            ))
        };
        let value = match column_type {
            ColumnType::Integer => json
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(DatabaseValue::Int32)
                .ok_or_else(|| mismatch(&json))?,
            ColumnType::BigInt => json
                .as_i64()
                .map(DatabaseValue::Int64)
                .ok_or_else(|| mismatch(&json))?,
            ColumnType::Real => json
                .as_f64()
                .map(DatabaseValue::Float64)
                .ok_or_else(|| mismatch(&json))?,
            ColumnType::Boolean => json
                .as_bool()
                .map(DatabaseValue::Bool)
                .ok_or_else(|| mismatch(&json))?,
            ColumnType::Text => match json {
                JsonValue::String(s) => DatabaseValue::String(s),
                other => DatabaseValue::String(other.to_string()),
            },
            ColumnType::Uuid => json
                .as_str()
                .and_then(|s| uuid::Uuid::parse_str(s).ok())
                .map(DatabaseValue::Uuid)
                .ok_or_else(|| mismatch(&json))?,
            ColumnType::Timestamp => json
                .as_str()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| DatabaseValue::DateTime(dt.with_timezone(&chrono::Utc)))
                .ok_or_else(|| mismatch(&json))?,
            ColumnType::Date => json
                .as_str()
                .and_then(|s| s.parse::<chrono::NaiveDate>().ok())
                .map(DatabaseValue::Date)
                .ok_or_else(|| mismatch(&json))?,
            ColumnType::Json => DatabaseValue::Json(json),
            ColumnType::Blob => {
                let bytes: Vec<u8> = serde_json::from_value(json)?;
                DatabaseValue::Bytes(bytes)
            }
        };
        Ok(value)
    }

    /// Normalize a value read from the store to the declared column type.
    ///
    /// SQLite has no boolean, uuid or timestamp storage classes, so values
    /// come back as integers and text.
    pub fn coerce(self, column_type: ColumnType) -> Self {
        match (column_type, self) {
            (ColumnType::Boolean, DatabaseValue::Int64(i)) => DatabaseValue::Bool(i != 0),
            (ColumnType::Boolean, DatabaseValue::Int32(i)) => DatabaseValue::Bool(i != 0),
            (ColumnType::Integer, DatabaseValue::Int64(i)) => match i32::try_from(i) {
                Ok(i) => DatabaseValue::Int32(i),
                Err(_) => DatabaseValue::Int64(i),
            },
            (ColumnType::BigInt, DatabaseValue::Int32(i)) => DatabaseValue::Int64(i as i64),
            (ColumnType::Real, DatabaseValue::Int64(i)) => DatabaseValue::Float64(i as f64),
            (ColumnType::Real, DatabaseValue::Float32(f)) => DatabaseValue::Float64(f as f64),
            (ColumnType::Json, DatabaseValue::String(s)) => match serde_json::from_str(&s) {
                Ok(json) => DatabaseValue::Json(json),
                Err(_) => DatabaseValue::String(s),
            },
            (_, value) => value,
        }
    }

    /// Stable textual form used for identity-map keys
    pub fn identity_key(&self) -> String {
        match self {
            DatabaseValue::Int32(i) => i.to_string(),
            DatabaseValue::Int64(i) => i.to_string(),
            DatabaseValue::String(s) => s.clone(),
            DatabaseValue::Uuid(u) => u.to_string(),
            other => other.to_json().to_string(),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f32> for DatabaseValue {
    fn from(value: f32) -> Self {
        DatabaseValue::Float32(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<chrono::NaiveTime> for DatabaseValue {
    fn from(value: chrono::NaiveTime) -> Self {
        DatabaseValue::Time(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect (0-based index)
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }

    /// Quote an identifier, doubling any embedded quote character
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let quote = self.identifier_quote();
        let doubled: String = [quote, quote].iter().collect();
        format!("{quote}{}{quote}", identifier.replace(quote, &doubled))
    }

    /// Column type used by `ensure_created`
    pub fn column_type_sql(&self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (SqlDialect::SQLite, ColumnType::Integer)
            | (SqlDialect::SQLite, ColumnType::BigInt)
            | (SqlDialect::SQLite, ColumnType::Boolean) => "INTEGER",
            (SqlDialect::SQLite, ColumnType::Real) => "REAL",
            (SqlDialect::SQLite, ColumnType::Blob) => "BLOB",
            (SqlDialect::SQLite, _) => "TEXT",
            (SqlDialect::PostgreSQL, ColumnType::Integer) => "INTEGER",
            (SqlDialect::PostgreSQL, ColumnType::BigInt) => "BIGINT",
            (SqlDialect::PostgreSQL, ColumnType::Real) => "DOUBLE PRECISION",
            (SqlDialect::PostgreSQL, ColumnType::Boolean) => "BOOLEAN",
            (SqlDialect::PostgreSQL, ColumnType::Text) => "TEXT",
            (SqlDialect::PostgreSQL, ColumnType::Uuid) => "UUID",
            (SqlDialect::PostgreSQL, ColumnType::Timestamp) => "TIMESTAMPTZ",
            (SqlDialect::PostgreSQL, ColumnType::Date) => "DATE",
            (SqlDialect::PostgreSQL, ColumnType::Json) => "JSONB",
            (SqlDialect::PostgreSQL, ColumnType::Blob) => "BYTEA",
            (SqlDialect::MySQL, ColumnType::Integer) => "INT",
            (SqlDialect::MySQL, ColumnType::BigInt) => "BIGINT",
            (SqlDialect::MySQL, ColumnType::Real) => "DOUBLE",
            (SqlDialect::MySQL, ColumnType::Boolean) => "TINYINT(1)",
            (SqlDialect::MySQL, ColumnType::Text) => "TEXT",
            (SqlDialect::MySQL, ColumnType::Uuid) => "CHAR(36)",
            (SqlDialect::MySQL, ColumnType::Timestamp) => "DATETIME(6)",
            (SqlDialect::MySQL, ColumnType::Date) => "DATE",
            (SqlDialect::MySQL, ColumnType::Json) => "JSON",
            (SqlDialect::MySQL, ColumnType::Blob) => "BLOB",
        }
    }

    /// Check if this dialect supports boolean types
    pub fn supports_boolean(&self) -> bool {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => true,
            SqlDialect::MySQL => false,
        }
    }
}

/// Database connection pool configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
            max_lifetime_seconds: Some(1800),
        }
    }
}

/// Open a pool for `database_url`, picking the backend from the URL scheme
pub async fn connect(
    database_url: &str,
    config: &DatabasePoolConfig,
) -> OrmResult<Arc<dyn DatabasePool>> {
    use crate::backends::{PostgresPool, SqlitePool};

    match DatabaseBackendType::detect(database_url)? {
        DatabaseBackendType::PostgreSQL => PostgresPool::connect(database_url, config).await,
        DatabaseBackendType::SQLite => SqlitePool::connect(database_url, config).await,
        other => Err(OrmError::Connection(format!(
            "No driver available for the {} backend",
            other
        ))),
    }
}
