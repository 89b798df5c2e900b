use proximity_feed::store::tables::DISHES;
use proximity_feed::{Cart, CartError, Dish, SetChange};
use serde_json::json;

use crate::support::*;

fn filled() -> Cart {
    let mut cart = Cart::new();
    for dish in menu() {
        cart.add(dish, 1).unwrap();
    }
    cart.set_quantity("jollof", 2);
    cart
}

#[tokio::test]
async fn follows_menu_changes() {
    let store = store();
    let mut subscription = subscribe(&store);
    let mut cart = filled();

    store
        .update(DISHES, "jollof", json!({ "price": 2700.0 }).as_object().cloned().unwrap())
        .unwrap();
    store
        .update(DISHES, "dodo", json!({ "active": false }).as_object().cloned().unwrap())
        .unwrap();
    store.delete(DISHES, "zobo").unwrap();
    drain(&mut cart, &mut subscription, 3).await;

    assert_eq!(cart.len(), 1);
    let line = cart.get("jollof").unwrap();
    assert_eq!(line.quantity, 2);
    assert_eq!(cart.total(), 5400.0);
}

#[tokio::test]
async fn reactivated_dish_does_not_come_back() {
    let store = store();
    let mut subscription = subscribe(&store);
    let mut cart = filled();

    store
        .update(DISHES, "dodo", json!({ "active": false }).as_object().cloned().unwrap())
        .unwrap();
    store
        .update(DISHES, "dodo", json!({ "active": true }).as_object().cloned().unwrap())
        .unwrap();
    drain(&mut cart, &mut subscription, 2).await;

    assert!(cart.get("dodo").is_none());

    let dodo = store.row(DISHES, "dodo").unwrap();
    let dish = Dish::from_row(&dodo).unwrap();
    assert_eq!(cart.add(dish, 1), Ok(1));
}

#[tokio::test]
async fn inactive_dish_cannot_be_added() {
    let store = store();
    store
        .update(DISHES, "zobo", json!({ "active": false }).as_object().cloned().unwrap())
        .unwrap();
    let zobo = Dish::from_row(&store.row(DISHES, "zobo").unwrap()).unwrap();

    let mut cart = Cart::new();
    assert_eq!(cart.add(zobo, 1), Err(CartError::Inactive("zobo".into())));
    assert!(cart.is_empty());
}

#[tokio::test]
async fn unsubscribed_cart_stops_changing() {
    let store = store();
    let mut subscription = subscribe(&store);
    let mut cart = filled();

    subscription.unsubscribe();
    store.delete(DISHES, "jollof").unwrap();

    assert!(subscription.recv().await.is_none());
    assert_eq!(cart.remove("missing"), SetChange::Unchanged);
    assert_eq!(cart.len(), 3);
}
