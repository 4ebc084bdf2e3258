//! The Model: entity types registered in a context

use std::any::TypeId;
use std::collections::HashMap;

use crate::error::{ModelError, OrmResult};
use crate::model::{ColumnDef, EntityDescriptor, EntityKind, ShardingDirective};

/// Mapped entity type: logical name, physical table, columns and key
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    type_id: TypeId,
    type_name: &'static str,
    name: &'static str,
    table: String,
    columns: Vec<ColumnDef>,
    key_column: Option<&'static str>,
    kind: EntityKind,
    sharding: Option<ShardingDirective>,
}

impl EntityType {
    pub(crate) fn from_descriptor(descriptor: &EntityDescriptor, table: String) -> Self {
        Self {
            type_id: descriptor.type_id,
            type_name: descriptor.type_name,
            name: descriptor.entity_name,
            table,
            columns: descriptor.columns.clone(),
            key_column: descriptor.key_column,
            kind: descriptor.kind,
            sharding: descriptor.sharding.clone(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Logical entity name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Physical table name (includes the shard suffix for sharded entities)
    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn key_column(&self) -> Option<&'static str> {
        self.key_column
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn sharding(&self) -> Option<&ShardingDirective> {
        self.sharding.as_ref()
    }

    pub(crate) fn require_key(&self) -> OrmResult<&'static str> {
        self.key_column
            .ok_or_else(|| ModelError::Query(format!("Entity '{}' has no primary key", self.name)))
    }

    pub(crate) fn require_column(&self, name: &str) -> OrmResult<&ColumnDef> {
        self.column(name).ok_or_else(|| {
            ModelError::Query(format!("Entity '{}' has no column '{}'", self.name, name))
        })
    }
}

/// In-memory schema description, built once per context
#[derive(Debug, Clone, Default)]
pub struct Model {
    entities: HashMap<TypeId, EntityType>,
    order: Vec<TypeId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_entity_type(&self, type_id: TypeId) -> Option<&EntityType> {
        self.entities.get(&type_id)
    }

    /// Entity type of `T`, or `TypeNotRegistered` naming `T`
    pub fn entity_type<T: 'static>(&self) -> OrmResult<&EntityType> {
        self.find_entity_type(TypeId::of::<T>())
            .ok_or_else(ModelError::not_registered::<T>)
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.entities.contains_key(&type_id)
    }

    /// Entity types in registration order
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns false when the type was already present
    pub(crate) fn add_entity_type(&mut self, entity_type: EntityType) -> bool {
        let type_id = entity_type.type_id;
        if self.entities.contains_key(&type_id) {
            return false;
        }
        self.entities.insert(type_id, entity_type);
        self.order.push(type_id);
        true
    }
}
