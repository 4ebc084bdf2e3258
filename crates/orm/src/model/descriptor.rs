//! Entity descriptors: the registration-time metadata of a mapped type

use std::any::TypeId;

use crate::error::short_type_name;
use crate::model::{ColumnDef, Entity, KeyedEntity, ShardingDirective, ViewEntity};

/// Identity of a context type, used to bind descriptors to their owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextIdentity {
    type_id: TypeId,
    name: &'static str,
}

impl ContextIdentity {
    pub fn of<C: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            name: short_type_name::<C>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Capability a descriptor was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Implements `KeyedEntity`
    Keyed,
    /// Implements `ViewEntity`
    View,
    /// Neither; never picked up by module registration
    Plain,
}

impl EntityKind {
    pub fn is_registrable(&self) -> bool {
        matches!(self, EntityKind::Keyed | EntityKind::View)
    }
}

/// Metadata binding a type to its owning contexts and optional sharding
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) entity_name: &'static str,
    pub(crate) columns: Vec<ColumnDef>,
    pub(crate) key_column: Option<&'static str>,
    pub(crate) kind: EntityKind,
    pub(crate) contexts: Vec<ContextIdentity>,
    pub(crate) sharding: Option<ShardingDirective>,
}

impl EntityDescriptor {
    fn base<T: Entity>(kind: EntityKind, key_column: Option<&'static str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: short_type_name::<T>(),
            entity_name: T::entity_name(),
            columns: T::columns(),
            key_column,
            kind,
            contexts: Vec::new(),
            sharding: None,
        }
    }

    /// Descriptor for a keyed model
    pub fn keyed<T: KeyedEntity>() -> Self {
        Self::base::<T>(EntityKind::Keyed, Some(T::key_column()))
    }

    /// Descriptor for a view model
    pub fn view<T: ViewEntity>() -> Self {
        Self::base::<T>(EntityKind::View, None)
    }

    /// Descriptor for a type with neither capability
    pub fn plain<T: Entity>() -> Self {
        Self::base::<T>(EntityKind::Plain, None)
    }

    /// Bind the descriptor to context type `C`; may be repeated for several contexts
    pub fn bound_to<C: 'static>(mut self) -> Self {
        let identity = ContextIdentity::of::<C>();
        if !self.contexts.contains(&identity) {
            self.contexts.push(identity);
        }
        self
    }

    /// Store the entity in time-partitioned tables
    pub fn sharded(mut self, directive: ShardingDirective) -> Self {
        self.sharding = Some(directive);
        self
    }

    pub fn is_bound_to(&self, context: &ContextIdentity) -> bool {
        self.contexts.contains(context)
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn sharding(&self) -> Option<&ShardingDirective> {
        self.sharding.as_ref()
    }
}
