#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use weft_orm::backends::{self, DatabasePoolStats};
use weft_orm::{
    ColumnDef, ColumnType, DatabaseBackendType, DatabasePool, DatabasePoolConfig, DatabaseRow,
    DatabaseTransaction, DatabaseValue, DbContext, DbContextBuilder, DbContextOptions, Entity,
    EntityDescriptor, KeyedEntity, ModelCatalog, OrmResult, QueryCache, ShardingDirective,
    SqlDialect, ViewEntity,
};

/// Context marker types
pub struct ShopContext;
pub struct ReportingContext;

pub const MODULE: &str = "shop.models";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<i64>,
    pub customer: String,
    pub amount: f64,
    pub status: String,
}

impl Order {
    pub fn new(id: i64, customer: &str, amount: f64, status: &str) -> Self {
        Self {
            id: Some(id),
            customer: customer.to_string(),
            amount,
            status: status.to_string(),
        }
    }
}

impl Entity for Order {
    fn entity_name() -> &'static str {
        "Order"
    }

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnType::BigInt),
            ColumnDef::new("customer", ColumnType::Text),
            ColumnDef::new("amount", ColumnType::Real),
            ColumnDef::new("status", ColumnType::Text),
        ]
    }
}

impl KeyedEntity for Order {
    type Key = Option<i64>;

    fn key(&self) -> Option<i64> {
        self.id
    }
}

/// Read-only projection over the orders table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTotal {
    pub customer: String,
    pub total: f64,
}

impl Entity for OrderTotal {
    fn entity_name() -> &'static str {
        "OrderTotal"
    }

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("customer", ColumnType::Text),
            ColumnDef::new("total", ColumnType::Real),
        ]
    }
}

impl ViewEntity for OrderTotal {}

/// Monthly-sharded log table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub message: String,
}

impl Entity for AuditLog {
    fn entity_name() -> &'static str {
        "AuditLog"
    }

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnType::BigInt),
            ColumnDef::new("message", ColumnType::Text),
        ]
    }
}

impl KeyedEntity for AuditLog {
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }
}

/// Bound to the reporting context only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub name: String,
}

impl Entity for Metric {
    fn entity_name() -> &'static str {
        "Metric"
    }

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnType::BigInt),
            ColumnDef::new("name", ColumnType::Text),
        ]
    }
}

impl KeyedEntity for Metric {
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }
}

pub fn catalog() -> ModelCatalog {
    ModelCatalog::new().module(
        MODULE,
        vec![
            EntityDescriptor::keyed::<Order>().bound_to::<ShopContext>(),
            EntityDescriptor::view::<OrderTotal>().bound_to::<ShopContext>(),
            EntityDescriptor::keyed::<AuditLog>()
                .bound_to::<ShopContext>()
                .sharded(ShardingDirective::new("_", "yyyyMM")),
            EntityDescriptor::keyed::<Metric>().bound_to::<ReportingContext>(),
        ],
    )
}

pub fn options() -> DbContextOptions {
    DbContextOptions::new("sqlite::memory:").with_model_module(MODULE)
}

/// Builder over `pool` with a private plan cache and a fixed shard clock (March 2024)
pub fn builder(pool: Arc<dyn DatabasePool>, options: DbContextOptions) -> DbContextBuilder {
    DbContext::builder::<ShopContext>(options)
        .catalog(catalog())
        .pool(pool)
        .query_cache(Arc::new(QueryCache::new()))
        .model_time(Local.with_ymd_and_hms(2024, 3, 17, 12, 0, 0).unwrap())
}

pub async fn memory_pool() -> Arc<dyn DatabasePool> {
    backends::connect("sqlite::memory:", &DatabasePoolConfig::default())
        .await
        .unwrap()
}

/// Counting pool over an in-memory database, tables created
pub async fn counting_pool() -> Arc<CountingPool> {
    Arc::new(CountingPool::new(memory_pool().await))
}

/// Fresh context on its own in-memory database with tables created
pub async fn shop(options: DbContextOptions) -> (DbContext, Arc<CountingPool>) {
    let pool = counting_pool().await;
    let mut ctx = builder(pool.clone(), options).build().await.unwrap();
    ctx.ensure_created().await.unwrap();
    pool.reset();
    (ctx, pool)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("weft_orm=debug")
        .with_test_writer()
        .try_init();
}

/// Pool wrapper counting database round trips, including those inside transactions
pub struct CountingPool {
    inner: Arc<dyn DatabasePool>,
    backend: Option<DatabaseBackendType>,
    round_trips: Arc<AtomicUsize>,
    statements: Arc<std::sync::Mutex<Vec<String>>>,
}

impl CountingPool {
    pub fn new(inner: Arc<dyn DatabasePool>) -> Self {
        Self {
            inner,
            backend: None,
            round_trips: Arc::new(AtomicUsize::new(0)),
            statements: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Report `backend` while still speaking the inner pool's dialect
    pub fn reporting_as(mut self, backend: DatabaseBackendType) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
        self.statements.lock().unwrap().clear();
    }

    fn record(&self, sql: &str) {
        record(&self.round_trips, &self.statements, sql);
    }
}

fn record(round_trips: &AtomicUsize, statements: &std::sync::Mutex<Vec<String>>, sql: &str) {
    round_trips.fetch_add(1, Ordering::SeqCst);
    statements.lock().unwrap().push(sql.to_string());
}

#[async_trait]
impl DatabasePool for CountingPool {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend.unwrap_or_else(|| self.inner.backend_type())
    }

    fn sql_dialect(&self) -> SqlDialect {
        self.inner.sql_dialect()
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let inner = self.inner.begin_transaction().await?;
        Ok(Box::new(CountingTransaction {
            inner,
            round_trips: Arc::clone(&self.round_trips),
            statements: Arc::clone(&self.statements),
        }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        self.record(sql);
        self.inner.execute(sql, params).await
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.record(sql);
        self.inner.fetch_all(sql, params).await
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        self.record(sql);
        self.inner.fetch_optional(sql, params).await
    }

    async fn fetch_result_sets(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        self.record(sql);
        self.inner.fetch_result_sets(sql, params).await
    }

    async fn close(&self) -> OrmResult<()> {
        self.inner.close().await
    }

    fn stats(&self) -> DatabasePoolStats {
        self.inner.stats()
    }
}

struct CountingTransaction {
    inner: Box<dyn DatabaseTransaction>,
    round_trips: Arc<AtomicUsize>,
    statements: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl DatabaseTransaction for CountingTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        record(&self.round_trips, &self.statements, sql);
        self.inner.execute(sql, params).await
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        record(&self.round_trips, &self.statements, sql);
        self.inner.fetch_all(sql, params).await
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        record(&self.round_trips, &self.statements, sql);
        self.inner.fetch_optional(sql, params).await
    }

    async fn fetch_result_sets(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        record(&self.round_trips, &self.statements, sql);
        self.inner.fetch_result_sets(sql, params).await
    }

    async fn commit(self: Box<Self>) -> OrmResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        self.inner.rollback().await
    }
}
