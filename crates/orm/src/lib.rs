//! # weft-orm: generic persistence context
//!
//! A data-access context that gives every registered entity type the same
//! CRUD, bulk, raw-SQL and transaction surface, on top of sqlx.
//!
//! - entities are registered from a named module of a `ModelCatalog`, bound
//!   to the context types that own them;
//! - time-sharded entities resolve their physical table once per context;
//! - compiled queries share cached plans keyed by query shape;
//! - changes are tracked per context and flushed by `save_changes`.

pub mod backends;
pub mod blocking;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod query;
pub mod tracking;
pub mod transaction;

pub use backends::{
    DatabaseBackendType, DatabasePool, DatabasePoolConfig, DatabaseRow, DatabaseRowExt,
    DatabaseTransaction, DatabaseValue, SqlDialect, ValueRow, BULK_COPY_BACKENDS,
};
pub use blocking::BlockingContext;
pub use config::DbContextOptions;
pub use context::{DbContext, DbContextBuilder};
pub use error::*;
pub use model::{
    ColumnDef, ColumnType, ContextIdentity, Entity, EntityDescriptor, EntityKind, EntityType,
    KeyedEntity, Model, ModelCatalog, ShardingDirective, ViewEntity,
};
pub use query::{
    DataTable, EntityQuery, Filter, OrderBy, PaginationResult, QueryCache, QueryCacheStats,
    UpdateSet,
};
pub use tracking::EntityState;
pub use transaction::DbTransaction;

pub use tokio_util::sync::CancellationToken;
