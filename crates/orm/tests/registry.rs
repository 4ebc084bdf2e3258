mod common;

use common::*;
use weft_orm::{
    ContextIdentity, DbContext, DbContextOptions, EntityDescriptor, EntityKind, ModelError,
};

#[tokio::test]
async fn test_module_registers_only_entities_bound_to_the_context() {
    let (ctx, _pool) = shop(options()).await;

    let names: Vec<&str> = ctx.get_all_entity_types().iter().map(|ty| ty.name()).collect();
    assert_eq!(names, vec!["Order", "OrderTotal", "AuditLog"]);
    assert!(matches!(
        ctx.db_set::<Metric>(),
        Err(ModelError::TypeNotRegistered { .. })
    ));
}

#[tokio::test]
async fn test_entity_kinds_and_keys() {
    let (ctx, _pool) = shop(options()).await;

    let orders = ctx.db_set::<Order>().unwrap();
    assert_eq!(orders.kind(), EntityKind::Keyed);
    assert_eq!(orders.key_column(), Some("id"));
    assert_eq!(orders.table_name(), "Order");

    let totals = ctx.db_set::<OrderTotal>().unwrap();
    assert_eq!(totals.kind(), EntityKind::View);
    assert_eq!(totals.key_column(), None);
}

#[tokio::test]
async fn test_sharded_table_name_is_resolved_from_model_time() {
    let (ctx, _pool) = shop(options()).await;
    assert_eq!(ctx.db_set::<AuditLog>().unwrap().table_name(), "AuditLog_202403");
}

#[tokio::test]
async fn test_unknown_module_fails_the_build() {
    let pool = memory_pool().await;
    let result = builder(pool, options().with_model_module("nowhere")).build().await;
    assert!(matches!(result, Err(ModelError::Configuration(_))));
}

#[tokio::test]
async fn test_without_module_only_explicit_entities_register() {
    let pool = memory_pool().await;
    let ctx = DbContext::builder::<ReportingContext>(DbContextOptions::new("sqlite::memory:"))
        .catalog(catalog())
        .entity(EntityDescriptor::keyed::<Order>())
        .pool(pool)
        .build()
        .await
        .unwrap();

    assert_eq!(ctx.get_all_entity_types().len(), 1);
    assert!(ctx.db_set::<Order>().is_ok());
    assert!(ctx.db_set::<Metric>().is_err());
}

#[tokio::test]
async fn test_contexts_of_different_types_see_their_own_entities() {
    let pool = memory_pool().await;
    let reporting = DbContext::builder::<ReportingContext>(options())
        .catalog(catalog())
        .pool(pool)
        .build()
        .await
        .unwrap();

    let names: Vec<&str> = reporting.get_all_entity_types().iter().map(|ty| ty.name()).collect();
    assert_eq!(names, vec!["Metric"]);
    assert_eq!(reporting.identity(), ContextIdentity::of::<ReportingContext>());
    assert_ne!(reporting.identity(), ContextIdentity::of::<ShopContext>());
    assert_eq!(reporting.identity().name(), "ReportingContext");
}
