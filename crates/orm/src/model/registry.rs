//! Entity registration
//!
//! `ModelCatalog` is the explicit registration table: named modules of entity
//! descriptors, assembled at startup. `EntityRegistry` runs the one-time
//! registration pass of a context, picking the descriptors bound to that
//! context and resolving shard names as entities enter the model.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{ModelError, OrmResult};
use crate::model::{ContextIdentity, EntityDescriptor, EntityType, Model, ShardResolver};

/// Named modules of entity descriptors
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    modules: HashMap<String, Vec<EntityDescriptor>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add descriptors to a module, creating it if needed
    pub fn module<I>(mut self, name: impl Into<String>, descriptors: I) -> Self
    where
        I: IntoIterator<Item = EntityDescriptor>,
    {
        self.modules.entry(name.into()).or_default().extend(descriptors);
        self
    }

    pub fn register(&mut self, module: &str, descriptor: EntityDescriptor) {
        self.modules.entry(module.to_string()).or_default().push(descriptor);
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    pub fn descriptors(&self, module: &str) -> Option<&[EntityDescriptor]> {
        self.modules.get(module).map(Vec::as_slice)
    }
}

/// What happened to one descriptor during registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Added,
    AlreadyPresent,
    NotBoundToContext,
    NotAModel,
}

/// Summary of a module registration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub added: usize,
    pub already_present: usize,
    pub skipped: usize,
}

/// Builds the model of one context
#[derive(Debug)]
pub struct EntityRegistry {
    context: ContextIdentity,
    shards: ShardResolver,
    model: Model,
}

impl EntityRegistry {
    pub fn new(context: ContextIdentity, shards: ShardResolver) -> Self {
        Self {
            context,
            shards,
            model: Model::new(),
        }
    }

    pub fn context(&self) -> ContextIdentity {
        self.context
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Register a descriptor unconditionally (no context-tag filter)
    pub fn register(&mut self, descriptor: &EntityDescriptor) -> OrmResult<RegistrationOutcome> {
        if self.model.contains(descriptor.type_id()) {
            return Ok(RegistrationOutcome::AlreadyPresent);
        }

        let table = match descriptor.sharding() {
            Some(directive) => self.shards.physical_name(descriptor.entity_name(), directive)?,
            None => descriptor.entity_name().to_string(),
        };
        debug!(
            "Registering entity {} as table {} in {}",
            descriptor.type_name(),
            table,
            self.context.name()
        );
        self.model.add_entity_type(EntityType::from_descriptor(descriptor, table));
        Ok(RegistrationOutcome::Added)
    }

    /// Register a descriptor if it is bound to this context and is a keyed or view model
    pub fn register_bound(
        &mut self,
        descriptor: &EntityDescriptor,
    ) -> OrmResult<RegistrationOutcome> {
        if !descriptor.is_bound_to(&self.context) {
            return Ok(RegistrationOutcome::NotBoundToContext);
        }
        if !descriptor.kind().is_registrable() {
            return Ok(RegistrationOutcome::NotAModel);
        }
        self.register(descriptor)
    }

    /// Register every eligible descriptor of `module`.
    ///
    /// `None` is a no-op; an unknown module name is a configuration error.
    pub fn register_module(
        &mut self,
        catalog: &ModelCatalog,
        module: Option<&str>,
    ) -> OrmResult<RegistrationReport> {
        let mut report = RegistrationReport::default();
        let Some(module) = module else {
            return Ok(report);
        };

        let descriptors = catalog.descriptors(module).ok_or_else(|| {
            ModelError::Configuration(format!(
                "Model module '{}' is not present in the catalog",
                module
            ))
        })?;

        for descriptor in descriptors {
            match self.register_bound(descriptor)? {
                RegistrationOutcome::Added => report.added += 1,
                RegistrationOutcome::AlreadyPresent => report.already_present += 1,
                RegistrationOutcome::NotBoundToContext | RegistrationOutcome::NotAModel => {
                    report.skipped += 1
                }
            }
        }

        info!(
            "Model module '{}' registered for {}: {} added, {} present, {} skipped",
            module,
            self.context.name(),
            report.added,
            report.already_present,
            report.skipped
        );
        Ok(report)
    }

    /// Freeze the model
    pub fn finish(self) -> Model {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, ColumnType, Entity, KeyedEntity, ShardingDirective, ViewEntity};
    use chrono::{Local, TimeZone};
    use serde::{Deserialize, Serialize};

    struct BillingContext;
    struct ReportingContext;

    #[derive(Debug, Serialize, Deserialize)]
    struct Invoice {
        id: i64,
    }

    impl Entity for Invoice {
        fn entity_name() -> &'static str {
            "Invoice"
        }
        fn columns() -> Vec<ColumnDef> {
            vec![ColumnDef::new("id", ColumnType::BigInt)]
        }
    }

    impl KeyedEntity for Invoice {
        type Key = i64;
        fn key(&self) -> i64 {
            self.id
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct InvoiceTotal {
        total: f64,
    }

    impl Entity for InvoiceTotal {
        fn entity_name() -> &'static str {
            "InvoiceTotal"
        }
        fn columns() -> Vec<ColumnDef> {
            vec![ColumnDef::new("total", ColumnType::Real)]
        }
    }

    impl ViewEntity for InvoiceTotal {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Scratch {
        note: String,
    }

    impl Entity for Scratch {
        fn entity_name() -> &'static str {
            "Scratch"
        }
        fn columns() -> Vec<ColumnDef> {
            vec![ColumnDef::new("note", ColumnType::Text)]
        }
    }

    fn registry() -> EntityRegistry {
        let at = Local.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        EntityRegistry::new(ContextIdentity::of::<BillingContext>(), ShardResolver::new(at))
    }

    fn catalog() -> ModelCatalog {
        ModelCatalog::new().module(
            "billing",
            vec![
                EntityDescriptor::keyed::<Invoice>().bound_to::<BillingContext>(),
                EntityDescriptor::view::<InvoiceTotal>()
                    .bound_to::<BillingContext>()
                    .bound_to::<ReportingContext>(),
                EntityDescriptor::plain::<Scratch>().bound_to::<BillingContext>(),
            ],
        )
    }

    #[test]
    fn test_register_module_filters_by_context_and_kind() {
        let mut registry = registry();
        let report = registry.register_module(&catalog(), Some("billing")).unwrap();
        assert_eq!(report, RegistrationReport { added: 2, already_present: 0, skipped: 1 });

        let model = registry.finish();
        assert!(model.entity_type::<Invoice>().is_ok());
        assert!(model.entity_type::<InvoiceTotal>().is_ok());
        assert!(matches!(
            model.entity_type::<Scratch>(),
            Err(ModelError::TypeNotRegistered { .. })
        ));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut registry = registry();
        registry.register_module(&catalog(), Some("billing")).unwrap();
        let second = registry.register_module(&catalog(), Some("billing")).unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.already_present, 2);
        assert_eq!(registry.model().len(), 2);
    }

    #[test]
    fn test_other_context_does_not_pick_up_unbound_types() {
        let at = Local.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        let mut registry =
            EntityRegistry::new(ContextIdentity::of::<ReportingContext>(), ShardResolver::new(at));
        registry.register_module(&catalog(), Some("billing")).unwrap();
        let model = registry.finish();
        assert_eq!(model.len(), 1);
        assert!(model.entity_type::<InvoiceTotal>().is_ok());
    }

    #[test]
    fn test_no_module_is_a_no_op() {
        let mut registry = registry();
        let report = registry.register_module(&catalog(), None).unwrap();
        assert_eq!(report, RegistrationReport::default());
        assert!(registry.model().is_empty());
    }

    #[test]
    fn test_unknown_module_is_a_configuration_error() {
        let mut registry = registry();
        let err = registry.register_module(&catalog(), Some("missing")).unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
    }

    #[test]
    fn test_sharded_entity_gets_partition_table() {
        let mut registry = registry();
        let descriptor = EntityDescriptor::keyed::<Invoice>()
            .bound_to::<BillingContext>()
            .sharded(ShardingDirective::new("_", "yyyyMM"));
        registry.register(&descriptor).unwrap();
        let model = registry.finish();
        assert_eq!(model.entity_type::<Invoice>().unwrap().table_name(), "Invoice_202405");
    }
}
