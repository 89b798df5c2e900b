//! FeedSession - one live feed for one viewer.
//!
//! Activation resolves the viewer once, subscribes to dish and restaurant
//! changes and spawns a single worker task that owns the admitted set:
//!
//! ```text
//!   dishes ──┐                      ┌── snapshot loads (JoinSet)
//!            ├──► worker task ◄─────┤
//! restaurants┘    (AdmittedSet)     └── re-fetches (JoinSet)
//!                      │
//!                      ▼
//!              watch::Sender<FeedView> ──► FeedHandle
//! ```
//!
//! All set mutation happens inside the worker. Events that arrive while a
//! snapshot is loading are queued and replayed in arrival order once the load
//! settles, so a snapshot never overwrites a newer event.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admitted::{AdmittedSet, SetChange};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::geo::{Coordinates, ProximityFilter};
use crate::inflight::InFlight;
use crate::location::{Geolocator, Place};
use crate::model::FeedItem;
use crate::reconcile::{
    apply_evaluation, dish_key, remove_restaurant, Fetched, Mode, Plan, Reconciler, Target,
};
use crate::snapshot::SnapshotLoader;
use crate::store::{
    tables, ChangeKind, ChangeStream, RowStore, StoreError, StreamMessage, Subscription,
    TableChange,
};

/// Counters collected by the worker, returned from [`FeedHandle::teardown`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedStats {
    pub events_received: usize,
    pub events_buffered: usize,
    pub refetches_started: usize,
    pub refetch_failures: usize,
    pub stale_discarded: usize,
    pub snapshots_loaded: usize,
    pub snapshot_failures: usize,
}

/// A change subscription that stopped delivering events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostStream {
    pub table: String,
    pub reason: String,
}

/// State of the change subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamHealth {
    #[default]
    Connected,
    /// One or more streams dropped, in the order they were lost. Items are
    /// the last known good state and may be stale.
    Lost { streams: Vec<LostStream> },
}

impl StreamHealth {
    pub fn lost_tables(&self) -> Vec<&str> {
        match self {
            StreamHealth::Connected => Vec::new(),
            StreamHealth::Lost { streams } => streams.iter().map(|s| s.table.as_str()).collect(),
        }
    }
}

/// What the feed currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedView {
    pub items: Vec<FeedItem>,
    /// A snapshot load is in flight.
    pub loading: bool,
    /// Set when the latest load failed; `items` are then from before it.
    pub load_error: Option<FeedError>,
    pub stream: StreamHealth,
    /// Bumped on every publish.
    pub revision: u64,
}

impl FeedView {
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.dish.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.dish.id.as_str()).collect()
    }
}

enum Command {
    Refresh,
}

/// Activates feed sessions against a store.
pub struct FeedSession<S: ?Sized> {
    store: Arc<S>,
    config: FeedConfig,
}

impl<S> FeedSession<S>
where
    S: RowStore + ChangeStream + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, config: FeedConfig) -> Self {
        Self { store, config }
    }

    /// Shorthand for `FeedSession::new(store, config).start(geolocator)`.
    pub async fn activate<G>(
        store: Arc<S>,
        geolocator: &G,
        config: FeedConfig,
    ) -> Result<FeedHandle, FeedError>
    where
        G: Geolocator + ?Sized,
    {
        Self::new(store, config).start(geolocator).await
    }

    /// Resolve the viewer, subscribe and spawn the worker.
    ///
    /// Fails if the config is invalid, the position cannot be resolved or a
    /// subscription cannot be opened. Reverse geocoding is best effort.
    pub async fn start<G>(self, geolocator: &G) -> Result<FeedHandle, FeedError>
    where
        G: Geolocator + ?Sized,
    {
        self.config.validate()?;

        let viewer = geolocator.current_position().await?;
        let place = match geolocator.reverse_geocode(viewer).await {
            Ok(place) => Some(place),
            Err(e) => {
                debug!(error = %e, "reverse geocoding failed, continuing without a place");
                None
            }
        };

        let dishes = subscribe(self.store.as_ref(), tables::DISHES)?;
        let restaurants = match subscribe(self.store.as_ref(), tables::RESTAURANTS) {
            Ok(subscription) => subscription,
            Err(e) => {
                dishes.unsubscribe();
                return Err(e);
            }
        };

        let filter = ProximityFilter::new(viewer, self.config.max_distance_km);
        let (view_tx, view_rx) = watch::channel(FeedView {
            loading: true,
            ..FeedView::default()
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Worker::new(self.store, filter, &self.config, view_tx);
        let task = tokio::spawn(worker.run(cancel.clone(), command_rx, dishes, restaurants));

        info!(
            latitude = viewer.latitude,
            longitude = viewer.longitude,
            max_distance_km = self.config.max_distance_km,
            "feed session activated"
        );

        Ok(FeedHandle {
            viewer,
            place,
            commands: command_tx,
            view: view_rx,
            cancel,
            task: Some(task),
        })
    }
}

fn subscribe<S: ChangeStream + ?Sized>(store: &S, table: &str) -> Result<Subscription, FeedError> {
    store
        .subscribe(table, &ChangeKind::ALL)
        .map_err(|e| FeedError::SubscriptionError {
            table: table.to_string(),
            reason: e.to_string(),
        })
}

/// Handle to a running feed session.
///
/// Dropping the handle cancels the session; [`teardown`](Self::teardown)
/// also waits for the worker to stop and returns its counters.
pub struct FeedHandle {
    viewer: Coordinates,
    place: Option<Place>,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<FeedView>,
    cancel: CancellationToken,
    task: Option<JoinHandle<FeedStats>>,
}

impl FeedHandle {
    /// Viewer position resolved at activation.
    pub fn viewer(&self) -> Coordinates {
        self.viewer
    }

    pub fn place(&self) -> Option<&Place> {
        self.place.as_ref()
    }

    pub fn view(&self) -> FeedView {
        self.view.borrow().clone()
    }

    pub fn items(&self) -> Vec<FeedItem> {
        self.view.borrow().items.clone()
    }

    /// A receiver that observes every published view.
    pub fn subscribe_view(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    /// Start a new snapshot load. A load already in flight is superseded.
    pub fn refresh(&self) -> Result<(), FeedError> {
        self.commands
            .send(Command::Refresh)
            .map_err(|_| FeedError::SessionClosed)
    }

    /// Wait until the published view satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&FeedView) -> bool,
    ) -> Result<FeedView, FeedError> {
        let mut view = self.view.clone();
        let matched = view
            .wait_for(predicate)
            .await
            .map_err(|_| FeedError::SessionClosed)?;
        Ok(matched.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the worker, abort in-flight fetches and unsubscribe.
    pub async fn teardown(mut self) -> FeedStats {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return FeedStats::default();
        };
        match task.await {
            Ok(stats) => {
                info!(?stats, "feed session torn down");
                stats
            }
            Err(e) => {
                warn!(error = %e, "feed worker did not stop cleanly");
                FeedStats::default()
            }
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Completion {
    key: String,
    generation: u64,
    mode: Mode,
    result: Result<Fetched, FeedError>,
}

struct Loaded {
    generation: u64,
    result: Result<AdmittedSet<FeedItem>, FeedError>,
}

enum Queued {
    Change(TableChange),
    Fetched(Completion),
}

struct Worker<S: ?Sized> {
    loader: SnapshotLoader<S>,
    reconciler: Reconciler<S>,
    set: AdmittedSet<FeedItem>,
    inflight: InFlight,
    fetches: JoinSet<Completion>,
    loads: JoinSet<Loaded>,
    /// Generation of the load whose result will be installed.
    loading: Option<u64>,
    buffer: VecDeque<Queued>,
    view: watch::Sender<FeedView>,
    load_error: Option<FeedError>,
    stream: StreamHealth,
    revision: u64,
    dirty: bool,
    stats: FeedStats,
}

impl<S> Worker<S>
where
    S: RowStore + ?Sized + 'static,
{
    fn new(
        store: Arc<S>,
        filter: ProximityFilter,
        config: &FeedConfig,
        view: watch::Sender<FeedView>,
    ) -> Self {
        Self {
            loader: SnapshotLoader::new(Arc::clone(&store), config.snapshot_limit),
            reconciler: Reconciler::new(store, filter).with_batch_limit(config.snapshot_limit),
            set: AdmittedSet::new(),
            inflight: InFlight::new(),
            fetches: JoinSet::new(),
            loads: JoinSet::new(),
            loading: None,
            buffer: VecDeque::new(),
            view,
            load_error: None,
            stream: StreamHealth::Connected,
            revision: 0,
            dirty: false,
            stats: FeedStats::default(),
        }
    }

    async fn run(
        mut self,
        cancel: CancellationToken,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut dishes: Subscription,
        mut restaurants: Subscription,
    ) -> FeedStats {
        let mut dishes_open = true;
        let mut restaurants_open = true;
        self.start_load();
        self.end_turn();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(command) = commands.recv() => match command {
                    Command::Refresh => self.start_load(),
                },

                message = dishes.recv(), if dishes_open => {
                    dishes_open = self.on_message(tables::DISHES, message);
                }

                message = restaurants.recv(), if restaurants_open => {
                    restaurants_open = self.on_message(tables::RESTAURANTS, message);
                }

                Some(joined) = self.loads.join_next(), if !self.loads.is_empty() => match joined {
                    Ok(loaded) => self.on_loaded(loaded),
                    Err(e) => self.on_load_panicked(e.to_string()),
                },

                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    match joined {
                        Ok(completion) => self.on_fetched(completion),
                        Err(e) => {
                            self.stats.refetch_failures += 1;
                            warn!(error = %e, "re-fetch task failed");
                        }
                    }
                }
            }

            self.end_turn();
        }

        self.fetches.abort_all();
        self.loads.abort_all();
        dishes.unsubscribe();
        restaurants.unsubscribe();
        self.stats
    }

    /// Returns whether the subscription is still open.
    fn on_message(&mut self, table: &str, message: Option<StreamMessage>) -> bool {
        match message {
            Some(StreamMessage::Change(change)) => {
                self.stats.events_received += 1;
                if self.loading.is_some() {
                    self.stats.events_buffered += 1;
                    self.buffer.push_back(Queued::Change(change));
                } else {
                    self.dispatch(change);
                }
                true
            }
            Some(StreamMessage::Closed { reason }) => {
                self.lose_stream(table, reason);
                false
            }
            None => {
                self.lose_stream(table, "stream ended".to_string());
                false
            }
        }
    }

    fn lose_stream(&mut self, table: &str, reason: String) {
        let error = FeedError::SubscriptionError {
            table: table.to_string(),
            reason: reason.clone(),
        };
        warn!(error = %error, "feed may be stale");
        let lost = LostStream {
            table: table.to_string(),
            reason,
        };
        if let StreamHealth::Lost { streams } = &mut self.stream {
            streams.push(lost);
        } else {
            self.stream = StreamHealth::Lost {
                streams: vec![lost],
            };
        }
        self.dirty = true;
    }

    fn dispatch(&mut self, change: TableChange) {
        match Plan::for_change(&change.table, &change.event) {
            Plan::Remove { id } => {
                self.inflight.cancel(&dish_key(&id));
                let generation = self.inflight.next_generation();
                self.inflight.fence(&id, generation);
                let change = self.set.remove(&id);
                self.mark(change);
            }
            Plan::RemoveRestaurant { id } => {
                self.inflight.cancel(&Target::Restaurant(id.clone()).key());
                let generation = self.inflight.next_generation();
                let removed = remove_restaurant(&mut self.set, &id, &HashSet::new());
                for dish in &removed {
                    self.inflight.fence(dish, generation);
                }
                self.dirty |= !removed.is_empty();
            }
            Plan::Refetch { target, mode } => self.spawn_fetch(target, mode),
            Plan::Ignore => {}
        }
    }

    fn spawn_fetch(&mut self, target: Target, mode: Mode) {
        let key = target.key();
        let generation = self.inflight.begin(&key);
        self.stats.refetches_started += 1;
        debug!(%key, generation, "re-fetching");

        let reconciler = self.reconciler.clone();
        self.fetches.spawn(async move {
            let result = reconciler.fetch(&target).await;
            Completion {
                key,
                generation,
                mode,
                result,
            }
        });
    }

    fn on_fetched(&mut self, completion: Completion) {
        if !self.inflight.complete(&completion.key, completion.generation) {
            self.stats.stale_discarded += 1;
            debug!(
                key = %completion.key,
                generation = completion.generation,
                "discarding superseded re-fetch"
            );
            return;
        }
        if self.loading.is_some() {
            self.buffer.push_back(Queued::Fetched(completion));
            return;
        }
        self.apply_completion(completion);
    }

    fn apply_completion(&mut self, completion: Completion) {
        let Completion {
            key,
            generation,
            mode,
            result,
        } = completion;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                self.stats.refetch_failures += 1;
                warn!(%key, error = %e, "re-fetch failed, keeping current state");
                return;
            }
        };

        match fetched {
            Fetched::Dish(evaluation) => {
                let id = evaluation.id.clone();
                if !self.inflight.is_fresh(&id, &key, generation) {
                    self.stats.stale_discarded += 1;
                    debug!(%id, generation, "discarding stale decision");
                    return;
                }
                self.inflight.fence(&id, generation);
                let change = apply_evaluation(&mut self.set, mode, evaluation);
                self.mark(change);
            }
            Fetched::Restaurant {
                id,
                dishes,
                complete,
            } => {
                let seen: HashSet<String> = dishes.iter().map(|e| e.id.clone()).collect();
                for evaluation in dishes {
                    let dish = evaluation.id.clone();
                    if !self.inflight.is_fresh(&dish, &dish_key(&dish), generation) {
                        self.stats.stale_discarded += 1;
                        continue;
                    }
                    self.inflight.fence(&dish, generation);
                    let change = apply_evaluation(&mut self.set, mode, evaluation);
                    self.mark(change);
                }

                // A capped query says nothing about the dishes it left out.
                if !complete {
                    return;
                }

                // Members of this restaurant the query no longer returns moved away.
                let inflight = &self.inflight;
                let orphaned = self.set.retain(|item| {
                    item.restaurant.id != id
                        || seen.contains(&item.dish.id)
                        || !inflight.is_fresh(&item.dish.id, &dish_key(&item.dish.id), generation)
                });
                self.dirty |= !orphaned.is_empty();
            }
        }
    }

    fn start_load(&mut self) {
        let generation = self.inflight.next_generation();
        if let Some(previous) = self.loading.replace(generation) {
            debug!(previous, generation, "superseding snapshot load");
        }
        debug!(generation, "starting snapshot load");

        let loader = self.loader.clone();
        let filter = self.reconciler.filter();
        self.loads.spawn(async move {
            Loaded {
                generation,
                result: loader.load(filter).await,
            }
        });
        self.dirty = true;
    }

    fn on_loaded(&mut self, loaded: Loaded) {
        if self.loading != Some(loaded.generation) {
            self.stats.stale_discarded += 1;
            debug!(generation = loaded.generation, "discarding superseded snapshot");
            return;
        }
        self.settle_load(loaded.result);
    }

    fn on_load_panicked(&mut self, reason: String) {
        warn!(error = %reason, "snapshot task failed");
        if self.loading.is_some() && self.loads.is_empty() {
            self.settle_load(Err(FeedError::LoadFailed(StoreError::Server(reason))));
        }
    }

    fn settle_load(&mut self, result: Result<AdmittedSet<FeedItem>, FeedError>) {
        self.loading = None;
        match result {
            Ok(set) => {
                self.stats.snapshots_loaded += 1;
                self.set = set;
                self.load_error = None;
            }
            Err(e) => {
                self.stats.snapshot_failures += 1;
                warn!(error = %e, "snapshot failed, keeping previous items");
                self.load_error = Some(e);
            }
        }
        self.dirty = true;

        let queued = self.buffer.len();
        if queued > 0 {
            debug!(queued, "replaying events queued during load");
        }
        while let Some(next) = self.buffer.pop_front() {
            match next {
                Queued::Change(change) => self.dispatch(change),
                Queued::Fetched(completion) => self.apply_completion(completion),
            }
        }
    }

    fn mark(&mut self, change: SetChange) {
        self.dirty |= change.is_change();
    }

    /// Publish and drop fences nothing can consult any more.
    fn end_turn(&mut self) {
        self.flush();
        let holding = self
            .buffer
            .iter()
            .any(|queued| matches!(queued, Queued::Fetched(_)));
        if !holding {
            self.inflight.release_fences();
        }
    }

    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.revision += 1;
        self.view.send_replace(FeedView {
            items: self.set.to_vec(),
            loading: self.loading.is_some(),
            load_error: self.load_error.clone(),
            stream: self.stream.clone(),
            revision: self.revision,
        });
    }
}
