//! Compiled query cache
//!
//! Plans are keyed by everything that determines the SQL text: the owning
//! context, the entity type and its physical table, the dialect, the kind of
//! query and the predicate shape. Values never take part in the key, so calls
//! that differ only by parameter values share one plan.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::backends::SqlDialect;
use crate::error::OrmResult;

static SHARED_CACHE: Lazy<Arc<QueryCache>> = Lazy::new(|| Arc::new(QueryCache::new()));

/// Kind of compiled query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    FindByKey,
    List,
    FirstOrDefault,
    Count,
}

/// Cache key of a compiled query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub context: TypeId,
    pub entity: TypeId,
    pub table: String,
    pub dialect: SqlDialect,
    pub kind: QueryKind,
    pub shape: String,
}

/// Immutable compiled query: SQL text and the number of parameters it binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    sql: String,
    param_count: usize,
}

impl QueryPlan {
    pub fn new(sql: String, param_count: usize) -> Self {
        Self { sql, param_count }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub plans: usize,
}

/// Thread-safe plan cache
#[derive(Debug, Default)]
pub struct QueryCache {
    plans: DashMap<PlanKey, Arc<QueryPlan>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used by contexts that were not given their own
    pub fn shared() -> Arc<QueryCache> {
        Arc::clone(&SHARED_CACHE)
    }

    /// Return the plan for `key`, building it at most once.
    ///
    /// A failed build leaves no entry behind.
    pub fn get_or_build<F>(&self, key: PlanKey, build: F) -> OrmResult<Arc<QueryPlan>>
    where
        F: FnOnce() -> OrmResult<QueryPlan>,
    {
        if let Some(plan) = self.plans.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(plan.value()));
        }

        match self.plans.entry(key) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let plan = Arc::new(build()?);
                debug!(
                    "Compiled {:?} plan for {}: {}",
                    entry.key().kind,
                    entry.key().table,
                    plan.sql()
                );
                self.misses.fetch_add(1, Ordering::Relaxed);
                entry.insert(Arc::clone(&plan));
                Ok(plan)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            plans: self.plans.len(),
        }
    }

    pub fn clear(&self) {
        self.plans.clear();
    }
}
