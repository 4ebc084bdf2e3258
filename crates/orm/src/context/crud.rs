//! CRUD operations of the context

use std::any::TypeId;
use std::sync::Arc;

use tracing::debug;

use super::DbContext;
use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::model::entity::entity_values;
use crate::model::{ColumnValues, Entity, EntityType, KeyedEntity};
use crate::query::entity_query::EntityQuery;
use crate::query::filter::Filter;
use crate::query::sql::{self, Select};
use crate::query::update::UpdateSet;
use crate::tracking::{EntityState, ModifiedColumns};

impl DbContext {
    /// Column snapshot and key of a keyed instance
    fn snapshot<T: KeyedEntity>(&self, entity: &T) -> OrmResult<(ColumnValues, DatabaseValue)> {
        let entity_type = self.model.entity_type::<T>()?;
        let values = entity_values(entity, entity_type)?;
        Ok((values, entity.key().into()))
    }

    fn require_key(key: &DatabaseValue, action: &str) -> OrmResult<()> {
        if key.is_null() {
            return Err(ModelError::Validation(format!(
                "Cannot {} an instance whose key is not set",
                action
            )));
        }
        Ok(())
    }

    // Change-tracked writes

    /// Track `entity` as `Added`; it is inserted by the next `save_changes`
    pub fn add<T: KeyedEntity>(&mut self, entity: &T) -> OrmResult<()> {
        let (values, key) = self.snapshot(entity)?;
        self.tracker.add(TypeId::of::<T>(), key, values)?;
        Ok(())
    }

    pub fn add_range<T: KeyedEntity>(&mut self, entities: &[T]) -> OrmResult<()> {
        for entity in entities {
            self.add(entity)?;
        }
        Ok(())
    }

    pub async fn add_async<T: KeyedEntity>(&mut self, entity: &T) -> OrmResult<()> {
        self.add(entity)
    }

    pub async fn add_range_async<T: KeyedEntity>(&mut self, entities: &[T]) -> OrmResult<()> {
        self.add_range(entities)
    }

    /// Mark every column of `entity` modified. An instance without a key value is added instead.
    pub fn edit<T: KeyedEntity>(&mut self, entity: &T) -> OrmResult<()> {
        let (values, key) = self.snapshot(entity)?;
        if key.is_null() {
            self.tracker.add(TypeId::of::<T>(), key, values)?;
        } else {
            self.tracker.mark_modified(TypeId::of::<T>(), key, values);
        }
        Ok(())
    }

    /// Mark only `columns` modified; an empty list marks the whole row.
    ///
    /// `Added` and untracked instances are attached as `Unchanged` first.
    pub fn edit_columns<T: KeyedEntity>(&mut self, entity: &T, columns: &[&str]) -> OrmResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type::<T>()?;
        let (values, key) = self.snapshot(entity)?;
        Self::require_key(&key, "edit")?;

        let mut named = Vec::with_capacity(columns.len());
        for column in columns {
            let column = entity_type.require_column(column)?.name;
            if Some(column) == entity_type.key_column() {
                return Err(ModelError::Validation(format!(
                    "Key column '{}.{}' cannot be modified",
                    entity_type.name(),
                    column
                )));
            }
            named.push(column);
        }

        let type_id = TypeId::of::<T>();
        let id = match self.tracker.lookup(type_id, &key) {
            Some(id) => {
                let state = self.tracker.entry(id).map(|entry| entry.state());
                if state == Some(EntityState::Added) {
                    self.tracker.reset_unchanged(id, values.clone())?;
                }
                id
            }
            None => self.tracker.attach(type_id, key.clone(), values.clone()),
        };

        if named.is_empty() {
            self.tracker.mark_modified(type_id, key, values);
            return Ok(());
        }
        self.tracker.mark_columns_modified(id, values, &named)
    }

    /// Attach instances as `Unchanged`; instances without a key value are added
    pub fn edit_range<T: KeyedEntity>(&mut self, entities: &[T]) -> OrmResult<()> {
        for entity in entities {
            let (values, key) = self.snapshot(entity)?;
            if key.is_null() {
                self.tracker.add(TypeId::of::<T>(), key, values)?;
            } else {
                self.tracker.attach(TypeId::of::<T>(), key, values);
            }
        }
        Ok(())
    }

    /// Mark `entity` for deletion; an `Added` instance is simply forgotten
    pub fn remove<T: KeyedEntity>(&mut self, entity: &T) -> OrmResult<()> {
        let (values, key) = self.snapshot(entity)?;
        Self::require_key(&key, "remove")?;
        let id = self.tracker.attach(TypeId::of::<T>(), key, values);
        self.tracker.mark_deleted(id)
    }

    /// Load by key and mark for deletion
    pub async fn delete_by_key<T: KeyedEntity>(&mut self, key: T::Key) -> OrmResult<()> {
        let key: DatabaseValue = key.into();
        let table = self.model.entity_type::<T>()?.table_name().to_string();
        if self.find::<T>(key.clone()).await?.is_none() {
            return Err(ModelError::NotFound(table));
        }
        let id = self
            .tracker
            .lookup(TypeId::of::<T>(), &key)
            .ok_or_else(|| ModelError::NotFound(table))?;
        self.tracker.mark_deleted(id)
    }

    /// Flush tracked changes in tracking order; returns affected rows
    pub async fn save_changes(&mut self) -> OrmResult<u64> {
        let dialect = self.dialect();
        let mut statements = Vec::new();
        for (_, entry) in self.tracker.pending() {
            let entity_type = self
                .model
                .find_entity_type(entry.type_id)
                .ok_or_else(|| {
                    ModelError::Validation("Tracked instance of an unregistered type".to_string())
                })?;
            let mut w = sql::SqlWriter::new(dialect);
            match entry.state {
                EntityState::Added => sql::insert(&mut w, entity_type, &entry.values)?,
                EntityState::Modified => {
                    let columns = modified_columns(entity_type, &entry.modified);
                    if columns.is_empty() {
                        continue;
                    }
                    sql::update_columns(&mut w, entity_type, &entry.values, &columns, &entry.key)?;
                }
                EntityState::Deleted => sql::delete_by_key(&mut w, entity_type, &entry.key)?,
                EntityState::Unchanged | EntityState::Detached => continue,
            }
            statements.push(w.finish());
        }

        if statements.is_empty() {
            return Ok(0);
        }

        debug!("Saving {} tracked changes", statements.len());
        let affected = self.execute_batch(&statements).await?;
        self.tracker.accept_changes();
        Ok(affected)
    }

    // Set-based writes

    /// `DELETE ... WHERE`, one round trip, nothing materialized
    pub async fn delete_where<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<u64> {
        let filter = filter.into().unwrap_or_default();
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type::<T>()?;
        let (sql, params) = self.render(|w| sql::delete_where(w, entity_type, &filter))?;
        self.execute(&sql, &params).await
    }

    /// `UPDATE ... SET ... WHERE`, one round trip
    pub async fn update_where<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
        set: UpdateSet,
    ) -> OrmResult<u64> {
        let filter = filter.into().unwrap_or_default();
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type::<T>()?;
        let (sql, params) = self.render(|w| sql::update_where(w, entity_type, &set, &filter))?;
        self.execute(&sql, &params).await
    }

    // Reads

    /// Point lookup by key, tracked; the identity map is consulted first
    pub async fn find<T: KeyedEntity>(
        &mut self,
        key: impl Into<DatabaseValue>,
    ) -> OrmResult<Option<T>> {
        let key = key.into();
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type::<T>()?;
        if key.is_null() {
            return Ok(None);
        }
        if let Some(found) = self.find_tracked::<T>(&key)? {
            return Ok(found);
        }

        let filter = Filter::eq(entity_type.require_key()?, key);
        let select = Select {
            limit: Some(1),
            ..Select::rows(&filter)
        };
        let (sql, params) = self.render(|w| select.render(w, entity_type))?;
        let rows = self.fetch_all(&sql, &params).await?;
        Ok(self.materialize::<T>(entity_type, rows, true)?.into_iter().next())
    }

    pub async fn find_by_key<T: KeyedEntity>(&mut self, key: T::Key) -> OrmResult<Option<T>> {
        self.find::<T>(key).await
    }

    /// Identity-map hit: `Some(Some(_))` for a live entry, `Some(None)` for one marked deleted
    pub(crate) fn find_tracked<T: KeyedEntity>(
        &self,
        key: &DatabaseValue,
    ) -> OrmResult<Option<Option<T>>> {
        let Some(entry) = self
            .tracker
            .lookup(TypeId::of::<T>(), key)
            .and_then(|id| self.tracker.entry(id))
        else {
            return Ok(None);
        };
        if entry.state() == EntityState::Deleted {
            return Ok(Some(None));
        }
        Ok(Some(Some(crate::model::entity::entity_from_values(entry.values())?)))
    }

    /// Lazy query over `T`'s set; nothing runs until a terminal method
    pub fn get<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
        as_no_tracking: bool,
    ) -> OrmResult<EntityQuery<'_, T>> {
        self.model.entity_type::<T>()?;
        let tracking = !as_no_tracking && self.options.track_queries;
        Ok(EntityQuery::new(self, filter.into().unwrap_or_default(), tracking))
    }

    /// Zero rows → `None`, one row → the row, more → `MultipleResults`
    pub async fn get_single_or_default<T: Entity>(
        &mut self,
        filter: impl Into<Option<Filter>>,
    ) -> OrmResult<Option<T>> {
        let filter = filter.into().unwrap_or_default();
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type::<T>()?;
        let select = Select {
            limit: Some(2),
            ..Select::rows(&filter)
        };
        let (sql, params) = self.render(|w| select.render(w, entity_type))?;
        let rows = self.fetch_all(&sql, &params).await?;
        if rows.len() > 1 {
            return Err(ModelError::MultipleResults {
                table: entity_type.table_name().to_string(),
            });
        }
        let tracking = self.options.track_queries;
        Ok(self.materialize::<T>(entity_type, rows, tracking)?.into_iter().next())
    }

    pub async fn count<T: Entity>(&self, filter: impl Into<Option<Filter>>) -> OrmResult<u64> {
        let filter = filter.into().unwrap_or_default();
        let entity_type = self.model.entity_type::<T>()?;
        let (sql, params) = self.render(|w| Select::count(&filter).render(w, entity_type))?;
        self.fetch_count(&sql, &params).await
    }

    pub async fn exist<T: Entity>(&self, filter: impl Into<Option<Filter>>) -> OrmResult<bool> {
        let filter = filter.into().unwrap_or_default();
        let entity_type = self.model.entity_type::<T>()?;
        let (sql, params) = self.render(|w| Select::exists(&filter).render(w, entity_type))?;
        Ok(self.fetch_optional(&sql, &params).await?.is_some())
    }
}

/// Columns an UPDATE writes for a modified entry
fn modified_columns(entity_type: &EntityType, modified: &ModifiedColumns) -> Vec<&'static str> {
    let key = entity_type.key_column();
    match modified {
        ModifiedColumns::All => entity_type
            .columns()
            .iter()
            .map(|column| column.name)
            .filter(|name| Some(*name) != key)
            .collect(),
        ModifiedColumns::Only(columns) => {
            columns.iter().copied().filter(|name| Some(*name) != key).collect()
        }
    }
}
