//! The persistence context
//!
//! A `DbContext` owns one unit of work: the frozen model of its context type,
//! a change tracker and at most one ambient transaction. While a transaction
//! is open every statement the context issues runs inside it.

mod compiled;
mod crud;
mod raw_sql;

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::backends::{self, DatabasePool, DatabaseRow, DatabaseValue, SqlDialect};
use crate::config::DbContextOptions;
use crate::error::{ModelError, OrmResult};
use crate::model::entity::{entity_from_values, row_values};
use crate::model::{
    ContextIdentity, Entity, EntityDescriptor, EntityKind, EntityRegistry, EntityType, KeyedEntity,
    Model, ModelCatalog, ShardResolver,
};
use crate::query::cache::QueryCache;
use crate::query::sql::{self, SqlWriter};
use crate::tracking::{ChangeTracker, EntityState};
use crate::transaction::DbTransaction;

/// Builder for a `DbContext` of context type `C`
pub struct DbContextBuilder {
    identity: ContextIdentity,
    options: DbContextOptions,
    catalog: ModelCatalog,
    entities: Vec<EntityDescriptor>,
    pool: Option<Arc<dyn DatabasePool>>,
    cache: Option<Arc<QueryCache>>,
    model_time: Option<DateTime<Local>>,
}

impl DbContextBuilder {
    /// Catalog the configured model module is read from
    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Register an entity explicitly, regardless of its context bindings
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    /// Use an existing pool instead of connecting with the options' connection string
    pub fn pool(mut self, pool: Arc<dyn DatabasePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Use a private plan cache instead of the process-wide one
    pub fn query_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Clock reading used to resolve sharded table names
    pub fn model_time(mut self, at: DateTime<Local>) -> Self {
        self.model_time = Some(at);
        self
    }

    pub async fn build(self) -> OrmResult<DbContext> {
        self.options.validate()?;

        let shards = ShardResolver::new(self.model_time.unwrap_or_else(Local::now));
        let mut registry = EntityRegistry::new(self.identity, shards);
        registry.register_module(&self.catalog, self.options.model_module.as_deref())?;
        for descriptor in &self.entities {
            registry.register(descriptor)?;
        }
        let model = registry.finish();

        let pool = match self.pool {
            Some(pool) => pool,
            None => backends::connect(&self.options.connection_string, &self.options.pool).await?,
        };

        info!(
            "DbContext {} ready with {} entity types on {}",
            self.identity.name(),
            model.len(),
            self.options.redacted_connection_string()
        );

        Ok(DbContext {
            identity: self.identity,
            options: self.options,
            pool,
            model: Arc::new(model),
            cache: self.cache.unwrap_or_else(QueryCache::shared),
            tracker: ChangeTracker::new(),
            transaction: None,
        })
    }
}

/// Generic data-access context
pub struct DbContext {
    identity: ContextIdentity,
    options: DbContextOptions,
    pool: Arc<dyn DatabasePool>,
    model: Arc<Model>,
    cache: Arc<QueryCache>,
    tracker: ChangeTracker,
    transaction: Option<DbTransaction>,
}

impl std::fmt::Debug for DbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContext")
            .field("context", &self.identity.name())
            .field("backend", &self.pool.backend_type())
            .field("entity_types", &self.model.len())
            .field("tracked", &self.tracker.len())
            .field("transaction", &self.transaction)
            .finish()
    }
}

impl DbContext {
    /// Start building a context whose identity is the marker type `C`
    pub fn builder<C: 'static>(options: DbContextOptions) -> DbContextBuilder {
        DbContextBuilder {
            identity: ContextIdentity::of::<C>(),
            options,
            catalog: ModelCatalog::new(),
            entities: Vec::new(),
            pool: None,
            cache: None,
            model_time: None,
        }
    }

    pub fn identity(&self) -> ContextIdentity {
        self.identity
    }

    pub fn options(&self) -> &DbContextOptions {
        &self.options
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub(crate) fn model_arc(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }

    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    pub fn query_cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Mapping of `T`, or `TypeNotRegistered`
    pub fn db_set<T: Entity>(&self) -> OrmResult<&EntityType> {
        self.model.entity_type::<T>()
    }

    /// Every registered entity type, in registration order
    pub fn get_all_entity_types(&self) -> Vec<&EntityType> {
        self.model.entity_types().collect()
    }

    // Transactions

    /// The ambient transaction, beginning one when none is active
    pub async fn get_current_transaction(&mut self) -> OrmResult<DbTransaction> {
        if let Some(tx) = self.active_transaction() {
            return Ok(tx.clone());
        }
        let tx = DbTransaction::begin(self.pool.as_ref()).await?;
        self.transaction = Some(tx.clone());
        Ok(tx)
    }

    pub fn has_active_transaction(&self) -> bool {
        self.active_transaction().is_some()
    }

    /// Commit the ambient transaction
    pub async fn commit_transaction(&mut self) -> OrmResult<()> {
        self.take_transaction()?.commit().await
    }

    /// Roll back the ambient transaction
    pub async fn rollback_transaction(&mut self) -> OrmResult<()> {
        self.take_transaction()?.rollback().await
    }

    fn take_transaction(&mut self) -> OrmResult<DbTransaction> {
        match self.transaction.take() {
            Some(tx) if tx.is_active() => Ok(tx),
            _ => Err(ModelError::Transaction(
                "No transaction is active on this context".to_string(),
            )),
        }
    }

    pub(crate) fn active_transaction(&self) -> Option<&DbTransaction> {
        self.transaction.as_ref().filter(|tx| tx.is_active())
    }

    /// Run `statements` in the ambient transaction, or in a transaction of their own
    pub(crate) async fn execute_batch(
        &self,
        statements: &[(String, Vec<DatabaseValue>)],
    ) -> OrmResult<u64> {
        if let Some(tx) = self.active_transaction() {
            let tx = tx.clone();
            return self.execute_in(&tx, statements).await;
        }

        let tx = DbTransaction::begin(self.pool.as_ref()).await?;
        match self.execute_in(&tx, statements).await {
            Ok(affected) => {
                tx.commit().await?;
                Ok(affected)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Rollback after failed batch also failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    async fn execute_in(
        &self,
        tx: &DbTransaction,
        statements: &[(String, Vec<DatabaseValue>)],
    ) -> OrmResult<u64> {
        let mut affected = 0;
        for (sql, params) in statements {
            self.log_statement(sql, params);
            affected += tx.execute(sql, params).await?;
        }
        Ok(affected)
    }

    // Lifecycle

    /// Create missing tables for every registered keyed entity
    pub async fn ensure_created(&mut self) -> OrmResult<()> {
        let dialect = self.dialect();
        let mut statements = Vec::new();
        for entity_type in self.model.entity_types().filter(|ty| ty.kind() == EntityKind::Keyed) {
            let mut w = SqlWriter::new(dialect);
            sql::create_table(&mut w, entity_type)?;
            statements.push(w.finish());
        }
        if statements.is_empty() {
            return Ok(());
        }
        self.execute_batch(&statements).await?;
        Ok(())
    }

    /// End the unit of work, rolling back anything not committed
    pub async fn close(mut self) -> OrmResult<()> {
        self.tracker.clear();
        if let Some(tx) = self.transaction.take().filter(|tx| tx.is_active()) {
            debug!("Closing {} with an open transaction; rolling back", self.identity.name());
            tx.rollback().await?;
        }
        Ok(())
    }

    // Change tracker introspection

    /// State of `entity` in this context's tracker
    pub fn entry_state<T: KeyedEntity>(&self, entity: &T) -> EntityState {
        let key: DatabaseValue = entity.key().into();
        self.tracker.state_of(std::any::TypeId::of::<T>(), &key)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    pub fn clear_tracker(&mut self) {
        self.tracker.clear();
    }

    // Statement plumbing

    pub(crate) fn dialect(&self) -> SqlDialect {
        self.pool.sql_dialect()
    }

    pub(crate) fn render<F>(&self, build: F) -> OrmResult<(String, Vec<DatabaseValue>)>
    where
        F: FnOnce(&mut SqlWriter) -> OrmResult<()>,
    {
        let mut w = SqlWriter::new(self.dialect());
        build(&mut w)?;
        Ok(w.finish())
    }

    fn log_statement(&self, sql: &str, params: &[DatabaseValue]) {
        if self.options.log_sql {
            debug!("Executing SQL: {} with {} params {:?}", sql, params.len(), params);
        }
    }

    pub(crate) async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        self.log_statement(sql, params);
        match self.active_transaction() {
            Some(tx) => tx.execute(sql, params).await,
            None => self.pool.execute(sql, params).await,
        }
    }

    pub(crate) async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.log_statement(sql, params);
        match self.active_transaction() {
            Some(tx) => tx.fetch_all(sql, params).await,
            None => self.pool.fetch_all(sql, params).await,
        }
    }

    pub(crate) async fn fetch_result_sets(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        self.log_statement(sql, params);
        match self.active_transaction() {
            Some(tx) => tx.fetch_result_sets(sql, params).await,
            None => self.pool.fetch_result_sets(sql, params).await,
        }
    }

    pub(crate) async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        self.log_statement(sql, params);
        match self.active_transaction() {
            Some(tx) => tx.fetch_optional(sql, params).await,
            None => self.pool.fetch_optional(sql, params).await,
        }
    }

    /// Single integer result of a COUNT-style statement
    pub(crate) async fn fetch_count(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let row = self
            .fetch_optional(sql, params)
            .await?
            .ok_or_else(|| ModelError::Query("Count query returned no row".to_string()))?;
        match row.get_by_index(0)? {
            DatabaseValue::Int64(n) => Ok(n.max(0) as u64),
            DatabaseValue::Int32(n) => Ok(n.max(0) as u64),
            other => Err(ModelError::Query(format!("Count query returned {:?}", other))),
        }
    }

    /// Turn rows into entities, attaching them to the tracker when asked to
    pub(crate) fn materialize<T: Entity>(
        &mut self,
        entity_type: &EntityType,
        rows: Vec<Box<dyn DatabaseRow>>,
        tracking: bool,
    ) -> OrmResult<Vec<T>> {
        let key_column = match entity_type.kind() {
            EntityKind::Keyed if tracking => entity_type.key_column(),
            _ => None,
        };

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let values = row_values(row.as_ref(), entity_type)?;
            let key = key_column
                .and_then(|column| values.get(column).cloned())
                .filter(|key| !key.is_null());
            let Some(key) = key else {
                entities.push(entity_from_values(&values)?);
                continue;
            };

            // Reads never overwrite what the tracker already holds
            let id = self.tracker.attach(entity_type.type_id(), key, values);
            let entry = self
                .tracker
                .entry(id)
                .ok_or_else(|| ModelError::Validation(format!("Tracked entry {} vanished", id)))?;
            entities.push(entity_from_values(entry.values())?);
        }
        Ok(entities)
    }
}

impl Drop for DbContext {
    fn drop(&mut self) {
        if let Some(tx) = self.transaction.take().filter(|tx| tx.is_active()) {
            warn!(
                "DbContext {} dropped with open transaction {}; rolling it back",
                self.identity.name(),
                tx.id()
            );
            if !tx.abandon() {
                warn!("Transaction {} is busy and outlives its context", tx.id());
            }
        }
    }
}
