//! Ordering races between snapshot loads, re-fetches and deletes.

use proximity_feed::store::tables::DISHES;
use proximity_feed::{ChangeEvent, Dish, TableChange};
use serde_json::json;

use crate::support::*;

#[tokio::test]
async fn older_refetch_cannot_overwrite_newer() {
    let store = seeded_store();
    let gated = GatedStore::new(store.clone());
    let handle = activate(gated.clone()).await;
    settled(&handle).await;

    // first update's lookup reads the cheap price, then stalls
    let mut slow = gated.hold_lookup("d1");
    store
        .update(DISHES, "d1", row(json!({ "price": 100.0 })))
        .unwrap();
    slow.reached().await;

    store
        .update(DISHES, "d1", row(json!({ "active": false })))
        .unwrap();
    wait_for(&handle, |v| !v.contains("d1")).await;

    slow.open();
    tokio::time::sleep(SETTLE).await;
    assert!(!handle.view().contains("d1"));

    let stats = handle.teardown().await;
    assert_eq!(stats.stale_discarded, 1);
}

#[tokio::test]
async fn delete_beats_refetch_in_flight() {
    let store = seeded_store();
    let gated = GatedStore::new(store.clone());
    let handle = activate(gated.clone()).await;
    settled(&handle).await;

    let mut slow = gated.hold_lookup("d1");
    store
        .update(DISHES, "d1", row(json!({ "price": 2600.0 })))
        .unwrap();
    slow.reached().await;

    store.delete(DISHES, "d1").unwrap();
    wait_for(&handle, |v| v.items.is_empty()).await;

    slow.open();
    tokio::time::sleep(SETTLE).await;
    assert!(handle.view().items.is_empty());

    handle.teardown().await;
}

#[tokio::test]
async fn events_during_snapshot_are_replayed_after_it() {
    let store = seeded_store();
    let gated = GatedStore::new(store.clone());
    let mut snapshot = gated.hold_query();
    let handle = activate(gated.clone()).await;
    snapshot.reached().await;

    // the held snapshot already read d1 as present and d3 as absent
    store.delete(DISHES, "d1").unwrap();
    store
        .insert(DISHES, Dish::new("d3", "p1", "Boli", 600.0).to_row())
        .unwrap();
    tokio::time::sleep(SETTLE).await;
    assert!(handle.view().loading);

    snapshot.open();
    let view = wait_for(&handle, |v| !v.loading && v.contains("d3")).await;
    assert_eq!(view.ids(), vec!["d3"]);

    let stats = handle.teardown().await;
    assert_eq!(stats.events_buffered, 2);
}

#[tokio::test]
async fn newer_snapshot_supersedes_older() {
    let store = seeded_store();
    let gated = GatedStore::new(store.clone());
    let mut first = gated.hold_query();
    let handle = activate(gated.clone()).await;
    first.reached().await;

    store
        .seed(DISHES, Dish::new("d3", "p1", "Puff Puff", 400.0).to_row())
        .unwrap();
    handle.refresh().unwrap();
    let view = wait_for(&handle, |v| !v.loading).await;
    assert_eq!(view.ids(), vec!["d1", "d3"]);

    first.open();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(handle.view().ids(), vec!["d1", "d3"]);

    let stats = handle.teardown().await;
    assert_eq!(stats.snapshots_loaded, 1);
    assert_eq!(stats.stale_discarded, 1);
}

#[tokio::test]
async fn refetch_landing_during_reload_applies_to_new_set() {
    let store = seeded_store();
    let gated = GatedStore::new(store.clone());
    let handle = activate(gated.clone()).await;
    settled(&handle).await;

    // the lookup sees 3100, the reload that starts after it sees 2500 again
    let repriced = Dish::new("d1", "p1", "Jollof Rice", 3100.0).to_row();
    let mut lookup = gated.hold_lookup("d1");
    store.seed(DISHES, repriced.clone()).unwrap();
    store
        .publish(TableChange {
            table: DISHES.to_string(),
            event: ChangeEvent::Update {
                old: None,
                new: repriced,
            },
        })
        .unwrap();
    lookup.reached().await;
    store
        .seed(DISHES, Dish::new("d1", "p1", "Jollof Rice", 2500.0).to_row())
        .unwrap();

    let mut reload = gated.hold_query();
    handle.refresh().unwrap();
    reload.reached().await;

    lookup.open();
    tokio::time::sleep(SETTLE).await;
    assert!(handle.view().loading);

    reload.open();
    let view = wait_for(&handle, |v| !v.loading).await;
    let d1 = view.items.iter().find(|i| i.dish.id == "d1").unwrap();
    assert_eq!(d1.dish.price, 3100.0);

    handle.teardown().await;
}
