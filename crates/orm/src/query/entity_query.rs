//! Lazy entity queries returned by `DbContext::get`

use std::marker::PhantomData;

use crate::context::DbContext;
use crate::error::OrmResult;
use crate::model::Entity;
use crate::query::filter::Filter;
use crate::query::sql::{Projection, Select};
use crate::query::types::OrderBy;

/// Query over one entity set; composes until a terminal method runs it
pub struct EntityQuery<'c, T> {
    context: &'c mut DbContext,
    filter: Filter,
    order: Vec<OrderBy>,
    skip: Option<i64>,
    take: Option<i64>,
    tracking: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<'c, T: Entity> EntityQuery<'c, T> {
    pub(crate) fn new(context: &'c mut DbContext, filter: Filter, tracking: bool) -> Self {
        Self {
            context,
            filter,
            order: Vec::new(),
            skip: None,
            take: None,
            tracking,
            _entity: PhantomData,
        }
    }

    /// Narrow the query with another predicate (AND)
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and_also(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy::asc(column));
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy::desc(column));
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.skip = Some(count.min(i64::MAX as u64) as i64);
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.take = Some(count.min(i64::MAX as u64) as i64);
        self
    }

    pub fn as_no_tracking(mut self) -> Self {
        self.tracking = false;
        self
    }

    pub fn as_tracking(mut self) -> Self {
        self.tracking = true;
        self
    }

    fn select(&self, limit: Option<i64>) -> Select<'_> {
        Select {
            projection: Projection::Columns,
            filter: &self.filter,
            order: &self.order,
            limit,
            offset: self.skip,
        }
    }

    pub async fn to_list(self) -> OrmResult<Vec<T>> {
        let take = self.take;
        self.load(take).await
    }

    pub async fn first(self) -> OrmResult<Option<T>> {
        let limit = Some(self.take.map_or(1, |take| take.min(1)));
        Ok(self.load(limit).await?.into_iter().next())
    }

    async fn load(mut self, limit: Option<i64>) -> OrmResult<Vec<T>> {
        let model = self.context.model_arc();
        let entity_type = model.entity_type::<T>()?;
        let select = self.select(limit);
        let (sql, params) = self.context.render(|w| select.render(w, entity_type))?;
        let rows = self.context.fetch_all(&sql, &params).await?;
        let tracking = self.tracking;
        self.context.materialize::<T>(entity_type, rows, tracking)
    }

    pub async fn count(self) -> OrmResult<u64> {
        let entity_type = self.context.model().entity_type::<T>()?;
        let (sql, params) = if self.skip.is_none() && self.take.is_none() {
            self.context
                .render(|w| Select::count(&self.filter).render(w, entity_type))?
        } else {
            // Paged counts count the page, not the set
            let inner = Select {
                projection: Projection::Exists,
                ..self.select(self.take)
            };
            self.context.render(|w| {
                w.push("SELECT COUNT(*) FROM (");
                inner.render(w, entity_type)?;
                w.push(") weft_count");
                Ok(())
            })?
        };
        self.context.fetch_count(&sql, &params).await
    }

    pub async fn any(self) -> OrmResult<bool> {
        if self.skip.is_some() || self.take.is_some() {
            return Ok(self.count().await? > 0);
        }
        let entity_type = self.context.model().entity_type::<T>()?;
        let (sql, params) = self
            .context
            .render(|w| Select::exists(&self.filter).render(w, entity_type))?;
        Ok(self.context.fetch_optional(&sql, &params).await?.is_some())
    }
}
