//! PostgreSQL Backend Implementation
//!
//! PostgreSQL implementation of the backend traits using sqlx as the driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{Column, Either, Executor, Pool, Postgres, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::core::*;
use super::DatabaseBackendType;
use crate::error::{OrmError, OrmResult};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL connection pool implementation
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Connect a new pool with the given configuration
    pub async fn connect(
        database_url: &str,
        config: &DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds));

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        debug!(max_connections = config.max_connections, "PostgreSQL pool created");
        Ok(Arc::new(Self::new(pool)))
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let result = bind_params(sql, params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_params(sql, params).fetch_all(&self.pool).await?;
        convert_rows(rows)
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_params(sql, params).fetch_optional(&self.pool).await?;
        Ok(convert_rows(row.into_iter().collect())?.pop())
    }

    async fn fetch_result_sets(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        let stream = if params.is_empty() {
            (&self.pool).fetch_many(sql)
        } else {
            bind_params(sql, params).fetch_many(&self.pool)
        };
        split_result_sets(stream).await
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        DatabasePoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
        }
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn inner(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let tx = self.inner()?;
        let result = bind_params(sql, params).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let tx = self.inner()?;
        let rows = bind_params(sql, params).fetch_all(&mut **tx).await?;
        convert_rows(rows)
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let tx = self.inner()?;
        let row = bind_params(sql, params).fetch_optional(&mut **tx).await?;
        Ok(convert_rows(row.into_iter().collect())?.pop())
    }

    async fn fetch_result_sets(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        let tx = self.inner()?;
        let stream = if params.is_empty() {
            (&mut **tx).fetch_many(sql)
        } else {
            bind_params(sql, params).fetch_many(&mut **tx)
        };
        split_result_sets(stream).await
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

fn bind_params<'q>(sql: &'q str, params: &[DatabaseValue]) -> PgQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_database_value(query, param))
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> PgQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

/// Group streamed rows by the statement that produced them. Every statement
/// closes a set, so a statement that returns nothing yields an empty set.
async fn split_result_sets(
    mut stream: BoxStream<'_, Result<Either<PgQueryResult, PgRow>, sqlx::Error>>,
) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
    let mut sets = Vec::new();
    let mut current = Vec::new();
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(_) => sets.push(convert_rows(std::mem::take(&mut current))?),
            Either::Right(row) => current.push(row),
        }
    }
    if !current.is_empty() {
        sets.push(convert_rows(current)?);
    }
    Ok(sets)
}

fn convert_rows(rows: Vec<PgRow>) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first.columns().iter().map(|col| col.name().to_string()).collect();

    rows.iter()
        .map(|row| {
            let values = (0..columns.len())
                .map(|index| postgres_value_to_database_value(row, index))
                .collect::<OrmResult<Vec<_>>>()?;
            Ok(Box::new(ValueRow::new(columns.clone(), values)) as Box<dyn DatabaseRow>)
        })
        .collect()
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float32(row.try_get(index)?),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => DatabaseValue::String(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            DatabaseValue::DateTime(naive.and_utc())
        }
        "DATE" => DatabaseValue::Date(row.try_get(index)?),
        "TIME" => DatabaseValue::Time(row.try_get(index)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        _ => {
            let value: String = row.try_get_unchecked(index).map_err(|e| {
                OrmError::Database(format!(
                    "Failed to get value as string for unknown type '{}': {}",
                    type_name, e
                ))
            })?;
            DatabaseValue::String(value)
        }
    };
    Ok(value)
}
