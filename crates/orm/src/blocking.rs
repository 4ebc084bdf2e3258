//! Blocking facade
//!
//! `BlockingContext` drives a `DbContext` on its own current-thread runtime so
//! synchronous callers get the same surface. It must not be used from inside
//! another async runtime.

use serde::de::DeserializeOwned;
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use crate::backends::DatabaseValue;
use crate::context::{DbContext, DbContextBuilder};
use crate::error::{ModelError, OrmResult};
use crate::model::{Entity, KeyedEntity};
use crate::query::{DataTable, EntityQuery, Filter, OrderBy, PaginationResult, UpdateSet};
use crate::transaction::DbTransaction;

/// Synchronous wrapper around a `DbContext`
pub struct BlockingContext {
    context: Option<DbContext>,
    runtime: Runtime,
}

impl BlockingContext {
    /// Build the context on a fresh runtime
    pub fn build(builder: DbContextBuilder) -> OrmResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                ModelError::Configuration(format!("Failed to start blocking runtime: {}", e))
            })?;
        let context = runtime.block_on(builder.build())?;
        Ok(Self {
            context: Some(context),
            runtime,
        })
    }

    fn parts(&mut self) -> OrmResult<(&Runtime, &mut DbContext)> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| ModelError::Validation("Context has been closed".to_string()))?;
        Ok((&self.runtime, context))
    }

    /// The wrapped context, for the operations that never touch the store
    pub fn context(&self) -> Option<&DbContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut DbContext> {
        self.context.as_mut()
    }

    pub fn add<T: KeyedEntity>(&mut self, entity: &T) -> OrmResult<()> {
        self.parts()?.1.add(entity)
    }

    pub fn add_range<T: KeyedEntity>(&mut self, entities: &[T]) -> OrmResult<()> {
        self.parts()?.1.add_range(entities)
    }

    pub fn edit<T: KeyedEntity>(&mut self, entity: &T) -> OrmResult<()> {
        self.parts()?.1.edit(entity)
    }

    pub fn edit_columns<T: KeyedEntity>(&mut self, entity: &T, columns: &[&str]) -> OrmResult<()> {
        self.parts()?.1.edit_columns(entity, columns)
    }

    pub fn edit_range<T: KeyedEntity>(&mut self, entities: &[T]) -> OrmResult<()> {
        self.parts()?.1.edit_range(entities)
    }

    pub fn remove<T: KeyedEntity>(&mut self, entity: &T) -> OrmResult<()> {
        self.parts()?.1.remove(entity)
    }

    pub fn save_changes(&mut self) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.save_changes())
    }

    pub fn find<T: KeyedEntity>(&mut self, key: impl Into<DatabaseValue>) -> OrmResult<Option<T>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.find::<T>(key))
    }

    pub fn find_by_key<T: KeyedEntity>(&mut self, key: T::Key) -> OrmResult<Option<T>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.find_by_key::<T>(key))
    }

    /// Run a `get` query, shaped by `shape`, to a list
    pub fn get<T, F>(
        &mut self,
        filter: impl Into<Option<Filter>>,
        as_no_tracking: bool,
        shape: F,
    ) -> OrmResult<Vec<T>>
    where
        T: Entity,
        F: for<'c> FnOnce(EntityQuery<'c, T>) -> EntityQuery<'c, T>,
    {
        let (rt, ctx) = self.parts()?;
        let query = shape(ctx.get::<T>(filter, as_no_tracking)?);
        rt.block_on(query.to_list())
    }

    pub fn get_single_or_default<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Option<T>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.get_single_or_default::<T>(filter))
    }

    pub fn count<T: Entity>(&mut self, filter: impl Into<Option<Filter>>) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.count::<T>(filter))
    }

    pub fn exist<T: Entity>(&mut self, filter: impl Into<Option<Filter>>) -> OrmResult<bool> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.exist::<T>(filter))
    }

    pub fn delete_by_key<T: KeyedEntity>(&mut self, key: T::Key) -> OrmResult<()> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.delete_by_key::<T>(key))
    }

    pub fn delete_where<T: Entity>(&mut self, filter: impl Into<Option<Filter>>) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.delete_where::<T>(filter))
    }

    pub fn update_where<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
        set: UpdateSet,
    ) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.update_where::<T>(filter, set))
    }

    pub fn find_compiled<T: KeyedEntity>(&mut self, key: T::Key) -> OrmResult<Option<T>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.find_compiled::<T>(key))
    }

    pub fn list_compiled<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Vec<T>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.list_compiled::<T>(filter))
    }

    pub fn first_or_default_compiled<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Option<T>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.first_or_default_compiled::<T>(filter))
    }

    pub fn first_or_default_tracked_compiled<T: KeyedEntity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Option<T>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.first_or_default_tracked_compiled::<T>(filter))
    }

    pub fn count_compiled<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.count_compiled::<T>(filter))
    }

    pub fn execute_sql_with_non_query(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.execute_sql_with_non_query(sql, params))
    }

    pub fn execute_sql_with_non_query_cancellable(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
        token: &CancellationToken,
    ) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.execute_sql_with_non_query_cancellable(sql, params, token))
    }

    pub fn sql_query<T: Entity, V: DeserializeOwned>(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<V>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.sql_query::<T, V>(sql, params))
    }

    pub fn sql_query_paged<T: Entity, V: DeserializeOwned>(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
        order_by: &[OrderBy],
        page: u64,
        page_size: u64,
    ) -> OrmResult<PaginationResult<V>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.sql_query_paged::<T, V>(sql, params, order_by, page, page_size))
    }

    pub fn get_data_table(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<DataTable> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.get_data_table(sql, params))
    }

    pub fn get_data_tables(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<DataTable>> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.get_data_tables(sql, params))
    }

    pub fn bulk_insert<T: Entity>(
        &mut self,
        entities: &[T],
        destination_table: Option<&str>,
    ) -> OrmResult<u64> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.bulk_insert(entities, destination_table))
    }

    pub fn get_current_transaction(&mut self) -> OrmResult<DbTransaction> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.get_current_transaction())
    }

    pub fn commit_transaction(&mut self) -> OrmResult<()> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.commit_transaction())
    }

    pub fn rollback_transaction(&mut self) -> OrmResult<()> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.rollback_transaction())
    }

    pub fn ensure_created(&mut self) -> OrmResult<()> {
        let (rt, ctx) = self.parts()?;
        rt.block_on(ctx.ensure_created())
    }

    /// Roll back anything uncommitted and release the context
    pub fn close(mut self) -> OrmResult<()> {
        match self.context.take() {
            Some(context) => self.runtime.block_on(context.close()),
            None => Ok(()),
        }
    }
}

impl Drop for BlockingContext {
    fn drop(&mut self) {
        // Driver resources are released inside the runtime that created them
        let _guard = self.runtime.enter();
        self.context.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbContextOptions;
    use crate::model::{ColumnDef, ColumnType, EntityDescriptor};
    use serde::{Deserialize, Serialize};

    struct Ledger;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: i64,
        memo: String,
    }

    impl Entity for Entry {
        fn entity_name() -> &'static str {
            "Entry"
        }
        fn columns() -> Vec<ColumnDef> {
            vec![ColumnDef::new("id", ColumnType::BigInt), ColumnDef::new("memo", ColumnType::Text)]
        }
    }

    impl KeyedEntity for Entry {
        type Key = i64;
        fn key(&self) -> i64 {
            self.id
        }
    }

    fn open() -> BlockingContext {
        let builder = DbContext::builder::<Ledger>(DbContextOptions::new("sqlite::memory:"))
            .entity(EntityDescriptor::keyed::<Entry>());
        let mut ctx = BlockingContext::build(builder).unwrap();
        ctx.ensure_created().unwrap();
        ctx
    }

    #[test]
    fn test_blocking_round_trip() {
        let mut ctx = open();
        ctx.add(&Entry { id: 1, memo: "rent".into() }).unwrap();
        ctx.add(&Entry { id: 2, memo: "food".into() }).unwrap();
        assert_eq!(ctx.save_changes().unwrap(), 2);

        assert_eq!(ctx.count::<Entry>(None).unwrap(), 2);
        let found: Option<Entry> = ctx.find_by_key::<Entry>(2).unwrap();
        assert_eq!(found.unwrap().memo, "food");

        let ordered: Vec<Entry> = ctx.get(None, true, |q| q.order_by_desc("id")).unwrap();
        assert_eq!(ordered.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 1]);
        ctx.close().unwrap();
    }

    #[test]
    fn test_closed_context_is_reported() {
        let mut ctx = open();
        ctx.context.take();
        assert!(matches!(ctx.count::<Entry>(None), Err(ModelError::Validation(_))));
    }
}
