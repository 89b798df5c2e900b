//! Fixtures for feed tests: a Lagos neighbourhood and a store whose responses
//! can be held back to force out-of-order completions.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proximity_feed::store::tables::{DISHES, RESTAURANTS};
use proximity_feed::{
    ChangeKind, ChangeStream, Coordinates, Dish, FeedConfig, FeedHandle, FeedSession, FeedView,
    Filter, FixedGeolocator, InMemoryStore, Relation, Restaurant, Row, RowStore, StoreError,
    Subscription,
};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

pub const LAGOS: Coordinates = Coordinates::new(6.5244, 3.3792);
/// About 3 km north of the viewer.
pub const THREE_KM: Coordinates = Coordinates::new(6.5514, 3.3792);
/// About 1 km north of the viewer.
pub const ONE_KM: Coordinates = Coordinates::new(6.5334, 3.3792);
/// About 20 km north of the viewer.
pub const TWENTY_KM: Coordinates = Coordinates::new(6.7044, 3.3792);

pub const WAIT: Duration = Duration::from_secs(2);
/// Time given to the worker to process something with no observable effect.
pub const SETTLE: Duration = Duration::from_millis(100);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

pub fn store() -> InMemoryStore {
    init_tracing();
    InMemoryStore::new().with_relation(Relation::new(
        DISHES,
        "restaurant_id",
        RESTAURANTS,
        "restaurant",
    ))
}

/// Two restaurants: "p1" at ~3 km and "p2" at ~20 km, one dish each.
pub fn seeded_store() -> InMemoryStore {
    let store = store();
    store
        .seed(RESTAURANTS, Restaurant::new("p1", "Mama Put", THREE_KM).to_row())
        .unwrap();
    store
        .seed(RESTAURANTS, Restaurant::new("p2", "Ikorodu Grill", TWENTY_KM).to_row())
        .unwrap();
    store
        .seed(DISHES, Dish::new("d1", "p1", "Jollof Rice", 2500.0).to_row())
        .unwrap();
    store
        .seed(DISHES, Dish::new("d2", "p2", "Asun", 3500.0).to_row())
        .unwrap();
    store
}

pub async fn activate<S>(store: S) -> FeedHandle
where
    S: RowStore + ChangeStream + 'static,
{
    FeedSession::activate(
        Arc::new(store),
        &FixedGeolocator::new(LAGOS),
        FeedConfig::default(),
    )
    .await
    .unwrap()
}

pub async fn wait_for(handle: &FeedHandle, predicate: impl FnMut(&FeedView) -> bool) -> FeedView {
    timeout(WAIT, handle.wait_for(predicate))
        .await
        .expect("timed out waiting for feed view")
        .unwrap()
}

pub async fn settled(handle: &FeedHandle) -> FeedView {
    wait_for(handle, |v| !v.loading).await
}

/// A held store call. The call has already read its data when
/// [`reached`](Gate::reached) resolves; it returns once [`open`](Gate::open) is called.
pub struct Gate {
    reached: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Gate {
    pub async fn reached(&mut self) {
        timeout(WAIT, &mut self.reached)
            .await
            .expect("held call never started")
            .unwrap();
    }

    pub fn open(self) {
        let _ = self.release.send(());
    }
}

struct Hold {
    reached: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

impl Hold {
    async fn wait(self) {
        let _ = self.reached.send(());
        let _ = self.release.await;
    }
}

fn hold() -> (Gate, Hold) {
    let (reached_tx, reached_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    (
        Gate {
            reached: reached_rx,
            release: release_tx,
        },
        Hold {
            reached: reached_tx,
            release: release_rx,
        },
    )
}

/// Wraps an [`InMemoryStore`] so chosen reads return late with the data they
/// saw when they started.
#[derive(Clone)]
pub struct GatedStore {
    inner: InMemoryStore,
    lookups: Arc<Mutex<HashMap<String, VecDeque<Hold>>>>,
    queries: Arc<Mutex<VecDeque<Hold>>>,
}

impl GatedStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            lookups: Arc::default(),
            queries: Arc::default(),
        }
    }

    /// Hold the next lookup of `id`.
    pub fn hold_lookup(&self, id: &str) -> Gate {
        let (gate, hold) = hold();
        self.lookups
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(hold);
        gate
    }

    /// Hold the next query.
    pub fn hold_query(&self) -> Gate {
        let (gate, hold) = hold();
        self.queries.lock().unwrap().push_back(hold);
        gate
    }
}

#[async_trait]
impl RowStore for GatedStore {
    async fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let result = self.inner.query(table, filter, limit).await;
        let held = self.queries.lock().unwrap().pop_front();
        if let Some(held) = held {
            held.wait().await;
        }
        result
    }

    async fn get_by_id(&self, table: &str, id: &str) -> Result<Option<Row>, StoreError> {
        let result = self.inner.get_by_id(table, id).await;
        let held = self
            .lookups
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front);
        if let Some(held) = held {
            held.wait().await;
        }
        result
    }
}

impl ChangeStream for GatedStore {
    fn subscribe(&self, table: &str, kinds: &[ChangeKind]) -> Result<Subscription, StoreError> {
        self.inner.subscribe(table, kinds)
    }
}
