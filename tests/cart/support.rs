//! Fixtures for cart tests.

use proximity_feed::store::tables::DISHES;
use proximity_feed::{
    Cart, ChangeKind, ChangeStream, Dish, InMemoryStore, StreamMessage, Subscription,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn menu() -> Vec<Dish> {
    vec![
        Dish::new("jollof", "r1", "Jollof Rice", 2500.0),
        Dish::new("dodo", "r1", "Dodo", 800.0),
        Dish::new("zobo", "r2", "Zobo", 500.0),
    ]
}

pub fn store() -> InMemoryStore {
    init_tracing();
    let store = InMemoryStore::new();
    for dish in menu() {
        store.seed(DISHES, dish.to_row()).unwrap();
    }
    store
}

pub fn subscribe(store: &InMemoryStore) -> Subscription {
    store.subscribe(DISHES, &ChangeKind::ALL).unwrap()
}

/// Apply whatever is already queued on `subscription`.
pub async fn drain(cart: &mut Cart, subscription: &mut Subscription, expected: usize) {
    for _ in 0..expected {
        match subscription.recv().await {
            Some(StreamMessage::Change(change)) => {
                cart.apply_event(&change.event);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
