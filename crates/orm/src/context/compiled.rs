//! Compiled queries
//!
//! These operations look their SQL up in the plan cache by query shape and
//! only bind fresh parameter values per call.

use std::sync::Arc;

use super::DbContext;
use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::model::{Entity, EntityType, KeyedEntity};
use crate::query::cache::{PlanKey, QueryKind, QueryPlan};
use crate::query::filter::Filter;
use crate::query::sql::{Select, SqlWriter};

impl DbContext {
    fn compiled_plan(
        &self,
        entity_type: &EntityType,
        kind: QueryKind,
        select: &Select<'_>,
    ) -> OrmResult<Arc<QueryPlan>> {
        let dialect = self.dialect();
        let key = PlanKey {
            context: self.identity.type_id(),
            entity: entity_type.type_id(),
            table: entity_type.table_name().to_string(),
            dialect,
            kind,
            shape: select.shape(),
        };
        self.cache.get_or_build(key, || {
            let mut w = SqlWriter::new(dialect);
            select.render(&mut w, entity_type)?;
            let count = w.param_count();
            let (sql, _) = w.finish();
            Ok(QueryPlan::new(sql, count))
        })
    }

    fn bind(plan: &QueryPlan, select: &Select<'_>) -> OrmResult<Vec<DatabaseValue>> {
        let params = select.params();
        if params.len() != plan.param_count() {
            return Err(ModelError::Query(format!(
                "Compiled plan expects {} parameters, got {}",
                plan.param_count(),
                params.len()
            )));
        }
        Ok(params)
    }

    async fn run_compiled<T: Entity>(
        &mut self,
        kind: QueryKind,
        filter: Filter,
        limit: Option<i64>,
        tracking: bool,
    ) -> OrmResult<Vec<T>> {
        let model = self.model_arc();
        let entity_type = model.entity_type::<T>()?;
        let select = Select {
            limit,
            ..Select::rows(&filter)
        };
        let plan = self.compiled_plan(entity_type, kind, &select)?;
        let params = Self::bind(&plan, &select)?;
        let rows = self.fetch_all(plan.sql(), &params).await?;
        self.materialize::<T>(entity_type, rows, tracking)
    }

    /// Cached point lookup by key, tracked
    pub async fn find_compiled<T: KeyedEntity>(&mut self, key: T::Key) -> OrmResult<Option<T>> {
        let key: DatabaseValue = key.into();
        let key_column = self.model.entity_type::<T>()?.require_key()?;
        if key.is_null() {
            return Ok(None);
        }
        if let Some(found) = self.find_tracked::<T>(&key)? {
            return Ok(found);
        }
        let rows = self
            .run_compiled::<T>(QueryKind::FindByKey, Filter::eq(key_column, key), Some(1), true)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Cached filtered list, untracked
    pub async fn list_compiled<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Vec<T>> {
        let filter = filter.into().unwrap_or_default();
        self.run_compiled::<T>(QueryKind::List, filter, None, false).await
    }

    /// Cached first match, untracked
    pub async fn first_or_default_compiled<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Option<T>> {
        let filter = filter.into().unwrap_or_default();
        let rows = self
            .run_compiled::<T>(QueryKind::FirstOrDefault, filter, Some(1), false)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Cached first match, attached to the tracker
    pub async fn first_or_default_tracked_compiled<T: KeyedEntity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Option<T>> {
        let filter = filter.into().unwrap_or_default();
        let rows = self
            .run_compiled::<T>(QueryKind::FirstOrDefault, filter, Some(1), true)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Cached count
    pub async fn count_compiled<T: Entity>(
        &self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<u64> {
        let filter = filter.into().unwrap_or_default();
        let entity_type = self.model.entity_type::<T>()?;
        let select = Select::count(&filter);
        let plan = self.compiled_plan(entity_type, QueryKind::Count, &select)?;
        let params = Self::bind(&plan, &select)?;
        self.fetch_count(plan.sql(), &params).await
    }
}

