//! Query Module - filters, statement generation, compiled plans and lazy queries

pub mod cache;
pub mod entity_query;
pub mod filter;
pub mod pagination;
pub mod sql;
pub mod types;
pub mod update;

pub use cache::{PlanKey, QueryCache, QueryCacheStats, QueryKind, QueryPlan};
pub use entity_query::EntityQuery;
pub use filter::Filter;
pub use pagination::{DataTable, PaginationResult};
pub use sql::SqlWriter;
pub use types::{CompareOp, OrderBy, OrderDirection};
pub use update::UpdateSet;
