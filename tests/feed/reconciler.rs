//! Snapshot and reconciler behaviour against a populated store.

use std::sync::Arc;

use proptest::prelude::*;
use proximity_feed::store::tables::{DISHES, RESTAURANTS};
use proximity_feed::{
    distance_km, Availability, ChangeEvent, Coordinates, Dish, ProximityFilter, Reconciler,
    Restaurant, SnapshotLoader,
};
use serde_json::json;

use crate::support::*;

fn restaurant_at(i: usize, at: Coordinates, closed: bool) -> Restaurant {
    let availability = if closed {
        Availability::Closed
    } else {
        Availability::Open
    };
    Restaurant::new(format!("r{i}"), format!("Spot {i}"), at).with_availability(availability)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn snapshot_matches_independent_filter(
        spots in prop::collection::vec(
            ((-0.3f64..0.3), (-0.3f64..0.3), any::<bool>(), any::<bool>()),
            1..20,
        ),
        radius in 1.0f64..40.0,
    ) {
        let store = store();
        let mut expected = Vec::new();
        for (i, (dlat, dlon, closed, active)) in spots.iter().enumerate() {
            let at = Coordinates::new(LAGOS.latitude + dlat, LAGOS.longitude + dlon);
            store.seed(RESTAURANTS, restaurant_at(i, at, *closed).to_row()).unwrap();
            let dish = Dish::new(format!("d{i}"), format!("r{i}"), "Dish", 1000.0)
                .with_active(*active);
            store.seed(DISHES, dish.to_row()).unwrap();

            if *active && !*closed && distance_km(LAGOS, Some(at)) <= radius {
                expected.push(format!("d{i}"));
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let loader = SnapshotLoader::new(Arc::new(store), 100);
        let set = runtime
            .block_on(loader.load(ProximityFilter::new(LAGOS, radius)))
            .unwrap();

        let got: Vec<String> = set.keys().map(str::to_string).collect();
        prop_assert_eq!(got, expected);
    }
}

#[tokio::test]
async fn moving_a_dish_between_restaurants_reevaluates_it() {
    let store = seeded_store();
    let shared = Arc::new(store.clone());
    let filter = ProximityFilter::new(LAGOS, 15.0);
    let reconciler = Reconciler::new(Arc::clone(&shared), filter);
    let mut set = SnapshotLoader::new(shared, 100).load(filter).await.unwrap();

    let moved = store
        .update(DISHES, "d2", row(json!({ "restaurant_id": "p1" })))
        .unwrap()
        .unwrap();
    let report = reconciler
        .apply_event(&mut set, DISHES, &ChangeEvent::Update { old: None, new: moved })
        .await;

    assert_eq!(report.inserted, vec!["d2".to_string()]);
    assert_eq!(set.get("d2").unwrap().restaurant.id, "p1");
}

#[tokio::test]
async fn restaurant_losing_its_location_drops_its_dishes() {
    let store = seeded_store();
    let shared = Arc::new(store.clone());
    let filter = ProximityFilter::new(LAGOS, 15.0);
    let reconciler = Reconciler::new(Arc::clone(&shared), filter);
    let mut set = SnapshotLoader::new(shared, 100).load(filter).await.unwrap();
    assert!(set.contains("d1"));

    let unlocated = store
        .update(RESTAURANTS, "p1", row(json!({ "latitude": null, "longitude": null })))
        .unwrap()
        .unwrap();
    reconciler
        .apply_event(&mut set, RESTAURANTS, &ChangeEvent::Update { old: None, new: unlocated })
        .await;

    assert!(set.is_empty());
}

#[tokio::test]
async fn unrelated_tables_are_ignored() {
    let store = seeded_store();
    let shared = Arc::new(store.clone());
    let filter = ProximityFilter::new(LAGOS, 15.0);
    let reconciler = Reconciler::new(Arc::clone(&shared), filter);
    let mut set = SnapshotLoader::new(shared, 100).load(filter).await.unwrap();
    let before = set.clone();

    let report = reconciler
        .apply_event(
            &mut set,
            "orders",
            &ChangeEvent::Delete {
                old: row(json!({ "id": "d1" })),
            },
        )
        .await;

    assert!(report.is_empty());
    assert_eq!(set, before);
}
