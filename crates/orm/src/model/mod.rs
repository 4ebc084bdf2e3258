//! Entity model: capabilities, descriptors, registration and sharding

pub mod descriptor;
pub mod entity;
pub mod registry;
pub mod schema;
pub mod shard;

pub use descriptor::{ContextIdentity, EntityDescriptor, EntityKind};
pub use entity::{ColumnDef, ColumnType, ColumnValues, Entity, KeyedEntity, ViewEntity};
pub use registry::{EntityRegistry, ModelCatalog, RegistrationOutcome, RegistrationReport};
pub use schema::{EntityType, Model};
pub use shard::{ShardResolver, ShardingDirective};
