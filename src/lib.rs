//! A live, location-filtered feed of dishes kept in sync with a hosted store.
//!
//! ```text
//!  Geolocator ──► FeedSession::activate
//!                        │
//!         ┌──────────────┼────────────────────┐
//!         ▼              ▼                    ▼
//!  SnapshotLoader   ChangeStream ──►     Reconciler
//!   (bulk query)    (dishes, restaurants)  (re-fetch + admit)
//!         │                                   │
//!         └────────► AdmittedSet ◄────────────┘
//!                         │
//!                     FeedView
//! ```
//!
//! [`Cart`] applies the same change stream to a shopper's cart, keyed on the
//! dish's `active` flag instead of distance.

mod admitted;
mod cart;
mod config;
mod error;
mod geo;
mod inflight;
mod location;
mod model;
mod reconcile;
mod session;
mod snapshot;
pub mod store;

pub use admitted::{AdmittedSet, SetChange};
pub use cart::{Cart, CartError, CartLine};
pub use config::{
    ConfigError, FeedConfig, DEFAULT_MAX_DISTANCE_KM, DEFAULT_SNAPSHOT_LIMIT, MAX_DISTANCE_VAR,
    SNAPSHOT_LIMIT_VAR,
};
pub use error::FeedError;
pub use geo::{
    admit, admitted_distance, distance_km, Coordinates, ProximityFilter, EARTH_RADIUS_KM,
    UNKNOWN_DISTANCE_KM,
};
pub use inflight::{FetchState, InFlight};
pub use location::{FixedGeolocator, Geolocator, LocationError, Place};
pub use model::{Availability, Dish, DishRecord, FeedItem, Keyed, Restaurant};
pub use reconcile::{
    apply_evaluation, apply_fetched, dish_key, remove_restaurant, ApplyReport, Evaluation,
    Fetched, Mode, Plan, Reconciler, Target,
};
pub use session::{FeedHandle, FeedSession, FeedStats, FeedView, LostStream, StreamHealth};
pub use snapshot::SnapshotLoader;
pub use store::{
    ChangeEvent, ChangeKind, ChangeStream, Filter, InMemoryStore, Relation, Row, RowStore,
    StoreError, StreamMessage, Subscription, TableChange, Unsubscribe,
};
