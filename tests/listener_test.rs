use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use taskwire::clock::FixedClock;
use taskwire::db::{Db, Page};
use taskwire::engine::{ChangeRecord, Engine, InProcessFeed};
use taskwire::error::Error;
use taskwire::model::{BusinessEvent, EventStatus};

async fn setup() -> (Engine, Arc<InProcessFeed>) {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
    let db = Db::in_memory().await.unwrap().with_clock(Arc::new(clock));
    db.migrate().await.unwrap();
    let feed = Arc::new(InProcessFeed::new(16));
    let engine = Engine::builder(Arc::new(db)).feed(feed.clone()).build();
    (engine, feed)
}

/// Poll until `count` events of a module have settled.
async fn settled(engine: &Engine, module: &str, count: usize) -> Vec<BusinessEvent> {
    for _ in 0..500 {
        let events = engine
            .events_for_module(module, Page::default())
            .await
            .unwrap();
        let done = events
            .iter()
            .all(|e| matches!(e.status, EventStatus::Processed | EventStatus::Failed));
        if events.len() >= count && done {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{module}: {count} settled event(s) never appeared");
}

fn event_types(events: &[BusinessEvent]) -> Vec<&str> {
    let mut types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    types.sort();
    types
}

#[tokio::test]
async fn shadow_cache_supplies_prior_state_for_updates() {
    let (engine, feed) = setup().await;
    assert_eq!(engine.register_module("inventory", None).await.unwrap(), 1);

    feed.publish(
        "inventory_items",
        ChangeRecord::added("sku-1", json!({"name": "Hex bolt", "stockLevel": 15, "reorderPoint": 10})),
    )
    .await;
    feed.publish(
        "inventory_items",
        ChangeRecord::modified("sku-1", json!({"name": "Hex bolt", "stockLevel": 8, "reorderPoint": 10})),
    )
    .await;

    let events = settled(&engine, "inventory", 3).await;
    assert_eq!(
        event_types(&events),
        vec!["inventory_item_created", "stock_low", "stock_reorder_required"]
    );
    assert_eq!(engine.tasks_for_entity("inventory_item", "sku-1").await.unwrap().len(), 2);
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn feed_supplied_before_wins_over_the_cache() {
    let (engine, feed) = setup().await;
    engine.register_module("pipeline", None).await.unwrap();

    feed.publish(
        "deals",
        ChangeRecord::modified("d-1", json!({"name": "Northwind", "stage": "closed_lost", "updatedBy": "u-3"}))
            .with_before(json!({"name": "Northwind", "stage": "negotiation"})),
    )
    .await;

    let events = settled(&engine, "pipeline", 1).await;
    assert_eq!(events[0].event_type, "deal_stage_changed");
    assert_eq!(events[0].triggered_by.as_deref(), Some("u-3"));
    let tasks = engine.tasks_for_entity("deal", "d-1").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].template_id, "deal_loss_review");
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn update_without_any_prior_state_is_skipped() {
    let (engine, feed) = setup().await;
    engine.register_module("pipeline", None).await.unwrap();

    // Nothing cached yet: only primes the cache.
    feed.publish("deals", ChangeRecord::modified("d-1", json!({"name": "N", "stage": "open"})))
        .await;
    feed.publish("deals", ChangeRecord::modified("d-1", json!({"name": "N", "stage": "negotiation"})))
        .await;

    let events = settled(&engine, "pipeline", 1).await;
    assert_eq!(event_types(&events), vec!["deal_stage_changed"]);
    assert_eq!(events[0].previous_state, Some(json!({"name": "N", "stage": "open"})));
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn redelivered_add_is_processed_once() {
    let (engine, feed) = setup().await;
    engine.register_module("engagements", None).await.unwrap();

    let add = ChangeRecord::added("e-1", json!({"name": "Acme"}));
    feed.publish("engagements", add.clone()).await;
    feed.publish("engagements", add).await;
    // Ordered behind the redelivery on the same collection.
    feed.publish("engagements", ChangeRecord::added("e-2", json!({"name": "Globex"})))
        .await;

    let events = settled(&engine, "engagements", 2).await;
    assert_eq!(events.len(), 2);
    assert_eq!(engine.tasks_for_entity("engagement", "e-1").await.unwrap().len(), 1);
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn removal_evicts_the_cached_document() {
    let (engine, feed) = setup().await;
    engine.register_module("pipeline", None).await.unwrap();

    feed.publish("deals", ChangeRecord::added("d-1", json!({"name": "N", "stage": "open"})))
        .await;
    feed.publish("deals", ChangeRecord::removed("d-1")).await;
    feed.publish("deals", ChangeRecord::modified("d-1", json!({"name": "N", "stage": "won"})))
        .await;
    feed.publish("deals", ChangeRecord::added("d-2", json!({"name": "M", "stage": "open"})))
        .await;

    let events = settled(&engine, "pipeline", 2).await;
    assert_eq!(event_types(&events), vec!["deal_created", "deal_created"]);
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn a_bad_document_does_not_stop_the_subscription() {
    let (engine, feed) = setup().await;
    engine.register_module("engagements", None).await.unwrap();

    feed.publish("engagements", ChangeRecord::added("e-bad", json!("not a map")))
        .await;
    feed.publish("engagements", ChangeRecord::added("e-1", json!({"name": "Acme"})))
        .await;

    let events = settled(&engine, "engagements", 1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity_id, "e-1");
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn a_malformed_update_does_not_replace_the_prior_state() {
    let (engine, feed) = setup().await;
    engine.register_module("pipeline", None).await.unwrap();

    feed.publish("deals", ChangeRecord::added("d-1", json!({"name": "N", "stage": "qualified"})))
        .await;
    feed.publish("deals", ChangeRecord::modified("d-1", json!("garbage"))).await;
    feed.publish("deals", ChangeRecord::modified("d-1", json!({"name": "N", "stage": "closed_lost"})))
        .await;

    let events = settled(&engine, "pipeline", 2).await;
    assert_eq!(event_types(&events), vec!["deal_created", "deal_stage_changed"]);
    let changed = events
        .iter()
        .find(|e| e.event_type == "deal_stage_changed")
        .unwrap();
    assert_eq!(changed.previous_state, Some(json!({"name": "N", "stage": "qualified"})));
    let tasks = engine.tasks_for_entity("deal", "d-1").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].template_id, "deal_loss_review");
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn a_restock_records_events_without_tasks() {
    let (engine, feed) = setup().await;
    engine.register_module("inventory", None).await.unwrap();

    feed.publish("inventory_items", ChangeRecord::added("sku-1", json!({"name": "Bolt", "stockLevel": 8})))
        .await;
    feed.publish("inventory_items", ChangeRecord::modified("sku-1", json!({"name": "Bolt", "stockLevel": 500})))
        .await;

    let events = settled(&engine, "inventory", 3).await;
    assert_eq!(
        event_types(&events),
        vec!["inventory_item_created", "stock_low", "stock_reorder_required"]
    );
    assert!(events.iter().all(|e| e.status == EventStatus::Processed));
    assert!(engine.tasks_for_entity("inventory_item", "sku-1").await.unwrap().is_empty());
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn a_number_reserialized_as_float_is_not_a_change() {
    let (engine, feed) = setup().await;
    engine.register_module("finance", None).await.unwrap();

    feed.publish("budgets", ChangeRecord::added("b-1", json!({"name": "Q3", "utilization": 80})))
        .await;
    feed.publish("budgets", ChangeRecord::modified("b-1", json!({"name": "Q3", "utilization": 80.0})))
        .await;
    // Ordered behind the float rewrite on the same collection.
    feed.publish("budgets", ChangeRecord::added("b-2", json!({"name": "Q4", "utilization": 5})))
        .await;

    let events = settled(&engine, "finance", 2).await;
    assert_eq!(event_types(&events), vec!["budget_created", "budget_created"]);
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn registration_is_idempotent_and_validated() {
    let (engine, _feed) = setup().await;

    assert_eq!(engine.register_module("service_desk", None).await.unwrap(), 1);
    assert_eq!(engine.register_module("service_desk", None).await.unwrap(), 0);
    let tickets = vec!["tickets".to_string()];
    assert_eq!(engine.register_module("service_desk", Some(&tickets)).await.unwrap(), 0);
    assert_eq!(engine.subscriptions().len(), 1);

    assert!(matches!(
        engine.register_module("payroll", None).await,
        Err(Error::NotFound(_))
    ));
    let unknown = vec!["invoices".to_string()];
    assert!(matches!(
        engine.register_module("finance", Some(&unknown)).await,
        Err(Error::NotFound(_))
    ));
    engine.unsubscribe_all().await;
}

#[tokio::test]
async fn unsubscribe_all_stops_future_deliveries() {
    let (engine, feed) = setup().await;
    engine.register_module("finance", None).await.unwrap();
    engine.register_module("engagements", None).await.unwrap();
    assert_eq!(feed.subscriber_count("budgets"), 1);

    assert_eq!(engine.unsubscribe_all().await, 2);
    assert!(engine.subscriptions().is_empty());
    assert_eq!(feed.subscriber_count("budgets"), 0);
    let delivered = feed
        .publish("budgets", ChangeRecord::added("b-1", json!({"name": "Q3"})))
        .await;
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn pending_subscription_wakes_on_listener_events() {
    let (engine, feed) = setup().await;
    let mut pending = engine.subscribe_pending();
    engine.register_module("finance", None).await.unwrap();

    feed.publish("budgets", ChangeRecord::added("b-1", json!({"name": "Q3", "utilization": 10})))
        .await;
    let woke = tokio::time::timeout(Duration::from_secs(5), pending.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(woke.event_type, "budget_created");
    assert_eq!(woke.status, EventStatus::Pending);
    engine.unsubscribe_all().await;
}
