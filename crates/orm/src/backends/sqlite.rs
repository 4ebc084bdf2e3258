//! SQLite Backend Implementation
//!
//! SQLite has five storage classes, so uuids, timestamps and JSON are bound as
//! text and normalized back through `DatabaseValue::coerce` when an entity is
//! materialized.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions, SqliteQueryResult, SqliteRow};
use sqlx::{Column, Either, Executor, Pool, Row, Sqlite, TypeInfo, ValueRef};
use tracing::debug;

use super::core::*;
use super::DatabaseBackendType;
use crate::error::{OrmError, OrmResult};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite connection pool implementation
#[derive(Debug, Clone)]
pub struct SqlitePool {
    pool: Pool<Sqlite>,
}

impl SqlitePool {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Connect a new pool with the given configuration.
    ///
    /// In-memory databases live and die with their connection, so they are
    /// pinned to a single connection that is never recycled.
    pub async fn connect(
        database_url: &str,
        config: &DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds));

        if in_memory {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(config.idle_timeout_seconds.map(Duration::from_secs))
                .max_lifetime(config.max_lifetime_seconds.map(Duration::from_secs));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create SQLite pool: {}", e)))?;

        debug!(in_memory, "SQLite pool created");
        Ok(Arc::new(Self::new(pool)))
    }
}

#[async_trait]
impl DatabasePool for SqlitePool {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
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

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn inner(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
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

fn bind_params<'q>(sql: &'q str, params: &[DatabaseValue]) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_database_value(query, param))
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: SqliteQuery<'q>, value: &DatabaseValue) -> SqliteQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f as f64),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(u.to_string()),
        DatabaseValue::DateTime(dt) => query.bind(dt.to_rfc3339()),
        DatabaseValue::Date(d) => query.bind(d.to_string()),
        DatabaseValue::Time(t) => query.bind(t.to_string()),
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

/// Group streamed rows by the statement that produced them. Every statement
/// closes a set, so a statement that returns nothing yields an empty set.
async fn split_result_sets(
    mut stream: BoxStream<'_, Result<Either<SqliteQueryResult, SqliteRow>, sqlx::Error>>,
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

fn convert_rows(rows: Vec<SqliteRow>) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first.columns().iter().map(|col| col.name().to_string()).collect();

    rows.iter()
        .map(|row| {
            let values = (0..columns.len())
                .map(|index| sqlite_value_to_database_value(row, index))
                .collect::<OrmResult<Vec<_>>>()?;
            Ok(Box::new(ValueRow::new(columns.clone(), values)) as Box<dyn DatabaseRow>)
        })
        .collect()
}

/// Convert a SQLite value to DatabaseValue by its storage class
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => DatabaseValue::Int64(row.try_get_unchecked(index)?),
        "REAL" | "NUMERIC" => DatabaseValue::Float64(row.try_get_unchecked(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get_unchecked(index)?),
        _ => DatabaseValue::String(row.try_get_unchecked(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> Arc<dyn DatabasePool> {
        SqlitePool::connect("sqlite::memory:", &DatabasePoolConfig::default())
            .await
            .expect("in-memory sqlite")
    }

    #[tokio::test]
    async fn test_round_trip_values() {
        let pool = memory_pool().await;
        pool.execute("CREATE TABLE t (id INTEGER, name TEXT, score REAL, data BLOB)", &[])
            .await
            .unwrap();
        pool.execute(
            "INSERT INTO t (id, name, score, data) VALUES (?, ?, ?, ?)",
            &[1i64.into(), "ada".into(), 2.5f64.into(), vec![1u8, 2].into()],
        )
        .await
        .unwrap();

        let rows = pool.fetch_all("SELECT id, name, score, data FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get_by_name("id").unwrap(), DatabaseValue::Int64(1));
        assert_eq!(row.get_by_name("name").unwrap(), DatabaseValue::from("ada"));
        assert_eq!(row.get_by_name("score").unwrap(), DatabaseValue::Float64(2.5));
        assert_eq!(row.get_by_name("data").unwrap(), DatabaseValue::Bytes(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_writes() {
        let pool = memory_pool().await;
        pool.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();

        let mut tx = pool.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO t (id) VALUES (?)", &[7i64.into()]).await.unwrap();
        tx.rollback().await.unwrap();

        let row = pool.fetch_optional("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap().unwrap();
        assert_eq!(row.get_by_name("n").unwrap(), DatabaseValue::Int64(0));
    }

    #[tokio::test]
    async fn test_result_sets_follow_statement_order() {
        let pool = memory_pool().await;
        pool.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        pool.execute("INSERT INTO t (id) VALUES (1), (2)", &[]).await.unwrap();

        let sets = pool
            .fetch_result_sets("SELECT id FROM t ORDER BY id; SELECT COUNT(*) AS n FROM t", &[])
            .await
            .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].len(), 2);
        assert_eq!(sets[0][1].get_by_name("id").unwrap(), DatabaseValue::Int64(2));
        assert_eq!(sets[1][0].get_by_name("n").unwrap(), DatabaseValue::Int64(2));
    }
}
