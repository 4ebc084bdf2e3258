mod common;

use common::*;
use weft_orm::{EntityState, Filter, ModelError, UpdateSet};

async fn seeded() -> (weft_orm::DbContext, std::sync::Arc<CountingPool>) {
    let (mut ctx, pool) = shop(options()).await;
    ctx.add_range(&[
        Order::new(1, "ada", 10.0, "open"),
        Order::new(2, "ada", 25.5, "paid"),
        Order::new(3, "grace", 7.25, "open"),
    ])
    .unwrap();
    assert_eq!(ctx.save_changes().await.unwrap(), 3);
    ctx.clear_tracker();
    pool.reset();
    (ctx, pool)
}

#[tokio::test]
async fn test_add_then_save_inserts_rows() {
    init_tracing();
    let (mut ctx, pool) = shop(options()).await;
    let order = Order::new(7, "ada", 12.0, "open");

    ctx.add(&order).unwrap();
    assert_eq!(ctx.entry_state(&order), EntityState::Added);
    assert!(ctx.has_changes());

    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(ctx.entry_state(&order), EntityState::Unchanged);
    assert!(!ctx.has_changes());
    assert_eq!(pool.round_trips(), 1);

    assert_eq!(ctx.count::<Order>(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_save_without_changes_does_nothing() {
    let (mut ctx, pool) = shop(options()).await;
    assert_eq!(ctx.save_changes().await.unwrap(), 0);
    assert_eq!(pool.round_trips(), 0);
}

#[tokio::test]
async fn test_added_without_key_gets_one_from_the_store() {
    let (mut ctx, _pool) = shop(options()).await;
    let order = Order {
        id: None,
        ..Order::new(0, "linus", 3.0, "open")
    };

    ctx.add(&order).unwrap();
    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(ctx.tracked_count(), 0);

    let stored: Vec<Order> = ctx.get(None, true).unwrap().to_list().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].id.is_some());
}

#[tokio::test]
async fn test_adding_a_tracked_key_twice_is_rejected() {
    let (mut ctx, _pool) = seeded().await;
    let loaded: Order = ctx.find::<Order>(1i64).await.unwrap().unwrap();
    assert!(matches!(ctx.add(&loaded), Err(ModelError::Validation(_))));
}

#[tokio::test]
async fn test_edit_updates_every_column() {
    let (mut ctx, _pool) = seeded().await;
    let mut order = Order::new(2, "ada", 30.0, "refunded");
    order.customer = "ada l.".to_string();

    ctx.edit(&order).unwrap();
    assert_eq!(ctx.entry_state(&order), EntityState::Modified);
    assert_eq!(ctx.save_changes().await.unwrap(), 1);

    ctx.clear_tracker();
    let stored = ctx.find::<Order>(2i64).await.unwrap().unwrap();
    assert_eq!(stored, order);
}

#[tokio::test]
async fn test_edit_columns_writes_only_named_columns() {
    let (mut ctx, pool) = seeded().await;
    let changed = Order::new(1, "someone else", 99.0, "paid");

    ctx.edit_columns(&changed, &["status"]).unwrap();
    ctx.save_changes().await.unwrap();

    let update = pool
        .statements()
        .into_iter()
        .find(|sql| sql.starts_with("UPDATE"))
        .unwrap();
    assert_eq!(update, r#"UPDATE "Order" SET "status" = ? WHERE "id" = ?"#);

    ctx.clear_tracker();
    let stored = ctx.find::<Order>(1i64).await.unwrap().unwrap();
    assert_eq!(stored, Order::new(1, "ada", 10.0, "paid"));
}

#[tokio::test]
async fn test_edit_columns_rejects_unknown_and_key_columns() {
    let (mut ctx, _pool) = seeded().await;
    let order = Order::new(1, "ada", 10.0, "open");

    assert!(matches!(ctx.edit_columns(&order, &["colour"]), Err(ModelError::Query(_))));
    assert!(matches!(ctx.edit_columns(&order, &["id"]), Err(ModelError::Validation(_))));
}

#[tokio::test]
async fn test_remove_deletes_on_save() {
    let (mut ctx, _pool) = seeded().await;
    let order = ctx.find::<Order>(3i64).await.unwrap().unwrap();

    ctx.remove(&order).unwrap();
    assert_eq!(ctx.entry_state(&order), EntityState::Deleted);
    assert_eq!(ctx.find::<Order>(3i64).await.unwrap(), None);

    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(ctx.entry_state(&order), EntityState::Detached);
    assert_eq!(ctx.count::<Order>(None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_removing_an_added_instance_forgets_it() {
    let (mut ctx, pool) = shop(options()).await;
    let order = Order::new(4, "grace", 1.0, "open");

    ctx.add(&order).unwrap();
    ctx.remove(&order).unwrap();
    assert_eq!(ctx.entry_state(&order), EntityState::Detached);
    assert_eq!(ctx.save_changes().await.unwrap(), 0);
    assert_eq!(pool.round_trips(), 0);
}

#[tokio::test]
async fn test_delete_by_key() {
    let (mut ctx, _pool) = seeded().await;

    ctx.delete_by_key::<Order>(Some(1)).await.unwrap();
    ctx.save_changes().await.unwrap();
    assert!(!ctx.exist::<Order>(Filter::eq("id", 1i64)).await.unwrap());

    assert!(matches!(
        ctx.delete_by_key::<Order>(Some(42)).await,
        Err(ModelError::NotFound(table)) if table == "Order"
    ));
}

#[tokio::test]
async fn test_find_uses_the_identity_map() {
    let (mut ctx, pool) = seeded().await;

    let first = ctx.find_by_key::<Order>(Some(2)).await.unwrap().unwrap();
    assert_eq!(pool.round_trips(), 1);
    let again = ctx.find_by_key::<Order>(Some(2)).await.unwrap().unwrap();
    assert_eq!(pool.round_trips(), 1);
    assert_eq!(first, again);

    assert_eq!(ctx.find::<Order>(404i64).await.unwrap(), None);
}

#[tokio::test]
async fn test_set_based_update_and_delete() {
    let (mut ctx, pool) = seeded().await;

    let updated = ctx
        .update_where::<Order>(
            Filter::eq("customer", "ada"),
            UpdateSet::new().set("status", "archived").increment("amount", 1.0),
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(pool.round_trips(), 1);
    assert_eq!(ctx.count::<Order>(Filter::eq("status", "archived")).await.unwrap(), 2);

    let stored = ctx.find::<Order>(1i64).await.unwrap().unwrap();
    assert_eq!(stored.amount, 11.0);

    pool.reset();
    let deleted = ctx.delete_where::<Order>(Filter::lt("amount", 20.0)).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(pool.round_trips(), 1);
    assert_eq!(ctx.count::<Order>(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_where_requires_assignments() {
    let (mut ctx, _pool) = seeded().await;
    assert!(matches!(
        ctx.update_where::<Order>(None, UpdateSet::new()).await,
        Err(ModelError::Validation(_))
    ));
}

#[tokio::test]
async fn test_get_with_ordering_and_paging() {
    let (mut ctx, _pool) = seeded().await;

    let page: Vec<Order> = ctx
        .get(Filter::ne("status", "void"), true)
        .unwrap()
        .order_by_desc("amount")
        .skip(1)
        .take(1)
        .to_list()
        .await
        .unwrap();
    assert_eq!(page, vec![Order::new(1, "ada", 10.0, "open")]);

    let count = ctx.get::<Order>(None, true).unwrap().skip(2).count().await.unwrap();
    assert_eq!(count, 1);
    let first = ctx
        .get::<Order>(Filter::eq("customer", "grace"), true)
        .unwrap()
        .first()
        .await
        .unwrap();
    assert_eq!(first.map(|o| o.id), Some(Some(3)));
}

#[tokio::test]
async fn test_get_tracks_only_when_enabled() {
    let (mut ctx, _pool) = seeded().await;
    ctx.get::<Order>(None, false).unwrap().to_list().await.unwrap();
    assert_eq!(ctx.tracked_count(), 0);

    let (mut tracking, pool) = shop(options().with_query_tracking(true)).await;
    tracking.add(&Order::new(1, "ada", 1.0, "open")).unwrap();
    tracking.save_changes().await.unwrap();
    tracking.clear_tracker();
    pool.reset();

    tracking.get::<Order>(None, false).unwrap().to_list().await.unwrap();
    assert_eq!(tracking.tracked_count(), 1);
    tracking.clear_tracker();
    tracking.get::<Order>(None, true).unwrap().to_list().await.unwrap();
    assert_eq!(tracking.tracked_count(), 0);
}

#[tokio::test]
async fn test_get_single_or_default() {
    let (mut ctx, _pool) = seeded().await;

    let one = ctx.get_single_or_default::<Order>(Filter::eq("customer", "grace")).await.unwrap();
    assert_eq!(one.map(|o| o.amount), Some(7.25));

    let none = ctx.get_single_or_default::<Order>(Filter::eq("customer", "nobody")).await.unwrap();
    assert!(none.is_none());

    assert!(matches!(
        ctx.get_single_or_default::<Order>(Filter::eq("customer", "ada")).await,
        Err(ModelError::MultipleResults { .. })
    ));
}

#[tokio::test]
async fn test_filters_compose() {
    let (ctx, _pool) = seeded().await;

    let filter = Filter::or(vec![
        Filter::and(vec![Filter::eq("customer", "ada"), Filter::gt("amount", 20.0)]),
        Filter::in_list("id", vec![3i64]),
    ]);
    assert_eq!(ctx.count::<Order>(filter).await.unwrap(), 2);
    assert_eq!(ctx.count::<Order>(Filter::like("customer", "gr%")).await.unwrap(), 1);
    assert_eq!(ctx.count::<Order>(Filter::not(Filter::eq("status", "open"))).await.unwrap(), 1);
    assert!(ctx.exist::<Order>(None).await.unwrap());
}

#[tokio::test]
async fn test_unknown_filter_column_is_a_query_error() {
    let (ctx, _pool) = seeded().await;
    assert!(matches!(
        ctx.count::<Order>(Filter::eq("colour", "red")).await,
        Err(ModelError::Query(_))
    ));
}

#[tokio::test]
async fn test_unregistered_type_is_rejected() {
    let (mut ctx, _pool) = seeded().await;
    assert!(matches!(
        ctx.find::<Metric>(1i64).await,
        Err(ModelError::TypeNotRegistered { .. })
    ));
    assert!(matches!(
        ctx.add(&Metric { id: 1, name: "x".into() }),
        Err(ModelError::TypeNotRegistered { .. })
    ));
}

#[tokio::test]
async fn test_sharded_entity_round_trip() {
    let (mut ctx, pool) = shop(options()).await;
    ctx.add(&AuditLog { id: 1, message: "created".into() }).unwrap();
    ctx.save_changes().await.unwrap();

    assert!(pool.statements()[0].starts_with(r#"INSERT INTO "AuditLog_202403""#));
    assert_eq!(ctx.count::<AuditLog>(None).await.unwrap(), 1);
}
