//! Incremental reconciler: applies change events to an admitted set.
//!
//! Inserts and updates never trust the event payload. The payload carries the
//! raw row without its restaurant, and an update may be partial, so the full
//! joined record is re-fetched and run through the admission filter again.
//! Deletes are applied straight from the payload.
//!
//! Restaurant changes fan out: an updated restaurant re-evaluates every dish it
//! sells, since moving or closing it changes their admission even though no
//! dish row changed.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::admitted::{AdmittedSet, SetChange};
use crate::config::DEFAULT_SNAPSHOT_LIMIT;
use crate::error::FeedError;
use crate::geo::ProximityFilter;
use crate::model::{DishRecord, FeedItem};
use crate::store::{row_id, tables, ChangeEvent, Filter, Row, RowStore};

/// What a fetch re-reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Dish(String),
    /// Every dish sold by this restaurant.
    Restaurant(String),
}

impl Target {
    pub fn id(&self) -> &str {
        match self {
            Target::Dish(id) | Target::Restaurant(id) => id,
        }
    }

    /// Key used for per-target serialization of fetches.
    pub fn key(&self) -> String {
        match self {
            Target::Dish(id) => dish_key(id),
            Target::Restaurant(id) => format!("{}:{}", tables::RESTAURANTS, id),
        }
    }
}

pub fn dish_key(id: &str) -> String {
    format!("{}:{}", tables::DISHES, id)
}

/// How an admitted record is merged into the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Admitted records are added or refreshed; rejected ones are ignored.
    Insert,
    /// Admitted records are added or refreshed; rejected ones are removed.
    Update,
}

/// The work a change event asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Remove { id: String },
    RemoveRestaurant { id: String },
    Refetch { target: Target, mode: Mode },
    Ignore,
}

impl Plan {
    pub fn for_change(table: &str, event: &ChangeEvent) -> Plan {
        let Some(id) = event.row_id().map(str::to_string) else {
            warn!(table, kind = ?event.kind(), "change event without id, ignoring");
            return Plan::Ignore;
        };

        match (table, event) {
            (tables::DISHES, ChangeEvent::Delete { .. }) => Plan::Remove { id },
            (tables::DISHES, ChangeEvent::Insert { .. }) => Plan::Refetch {
                target: Target::Dish(id),
                mode: Mode::Insert,
            },
            (tables::DISHES, ChangeEvent::Update { .. }) => Plan::Refetch {
                target: Target::Dish(id),
                mode: Mode::Update,
            },
            (tables::RESTAURANTS, ChangeEvent::Delete { .. }) => Plan::RemoveRestaurant { id },
            (tables::RESTAURANTS, _) => Plan::Refetch {
                target: Target::Restaurant(id),
                mode: Mode::Update,
            },
            _ => Plan::Ignore,
        }
    }
}

/// A fresh admission decision for one dish.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub id: String,
    /// `None` means rejected (or undecodable).
    pub item: Option<FeedItem>,
}

/// Result of a re-fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Dish(Evaluation),
    /// `complete` is false when the re-query hit its row limit, so dishes it
    /// did not return may still belong to the restaurant.
    Restaurant {
        id: String,
        dishes: Vec<Evaluation>,
        complete: bool,
    },
}

/// Ids touched by applying one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub inserted: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
}

impl ApplyReport {
    pub fn record(&mut self, id: &str, change: SetChange) {
        match change {
            SetChange::Inserted => self.inserted.push(id.to_string()),
            SetChange::Replaced => self.replaced.push(id.to_string()),
            SetChange::Removed => self.removed.push(id.to_string()),
            SetChange::Unchanged => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.replaced.is_empty() && self.removed.is_empty()
    }
}

/// Re-fetches and re-evaluates rows named by change events.
pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    filter: ProximityFilter,
    batch_limit: usize,
}

impl<S: ?Sized> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            filter: self.filter,
            batch_limit: self.batch_limit,
        }
    }
}

impl<S: RowStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, filter: ProximityFilter) -> Self {
        Self {
            store,
            filter,
            batch_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }

    /// Cap on dishes re-read when a restaurant changes.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn filter(&self) -> ProximityFilter {
        self.filter
    }

    /// Re-read `target` from the store and evaluate what came back.
    ///
    /// A dish that no longer exists is a `RefetchFailed`, not a rejection: a
    /// delete event for it is expected to follow.
    pub async fn fetch(&self, target: &Target) -> Result<Fetched, FeedError> {
        match target {
            Target::Dish(id) => {
                let row = self
                    .store
                    .get_by_id(tables::DISHES, id)
                    .await
                    .map_err(|e| FeedError::refetch(target.key(), e))?
                    .ok_or_else(|| FeedError::refetch(target.key(), "row not found"))?;
                Ok(Fetched::Dish(self.evaluate_row(id, &row)))
            }
            Target::Restaurant(id) => {
                let filter = Filter::eq("restaurant_id", id.as_str());
                let rows = self
                    .store
                    .query(tables::DISHES, Some(&filter), self.batch_limit)
                    .await
                    .map_err(|e| FeedError::refetch(target.key(), e))?;
                let complete = rows.len() < self.batch_limit;
                if !complete {
                    warn!(
                        restaurant = %id,
                        limit = self.batch_limit,
                        "restaurant re-query hit its row limit; unseen dishes are left as they are"
                    );
                }
                let dishes = rows
                    .iter()
                    .filter_map(|row| {
                        let dish_id = row_id(row)?;
                        Some(self.evaluate_row(dish_id, row))
                    })
                    .collect();
                Ok(Fetched::Restaurant {
                    id: id.clone(),
                    dishes,
                    complete,
                })
            }
        }
    }

    fn evaluate_row(&self, id: &str, row: &Row) -> Evaluation {
        let item = match DishRecord::from_row(row) {
            Ok(record) => self.filter.evaluate(record),
            Err(e) => {
                debug!(id, error = %e, "malformed dish row treated as rejected");
                None
            }
        };
        Evaluation {
            id: id.to_string(),
            item,
        }
    }

    /// Apply an event, re-fetching as needed. Errors are returned to the caller.
    pub async fn try_apply_event(
        &self,
        set: &mut AdmittedSet<FeedItem>,
        table: &str,
        event: &ChangeEvent,
    ) -> Result<ApplyReport, FeedError> {
        let mut report = ApplyReport::default();
        match Plan::for_change(table, event) {
            Plan::Remove { id } => report.record(&id, set.remove(&id)),
            Plan::RemoveRestaurant { id } => {
                for removed in remove_restaurant(set, &id, &HashSet::new()) {
                    report.removed.push(removed);
                }
            }
            Plan::Refetch { target, mode } => {
                let fetched = self.fetch(&target).await?;
                report = apply_fetched(set, mode, fetched);
            }
            Plan::Ignore => {}
        }
        Ok(report)
    }

    /// Apply an event, swallowing re-fetch failures.
    ///
    /// A failed re-fetch leaves the set exactly as it was; it is logged and
    /// recovered by a later event for the same row or the next refresh.
    pub async fn apply_event(
        &self,
        set: &mut AdmittedSet<FeedItem>,
        table: &str,
        event: &ChangeEvent,
    ) -> ApplyReport {
        match self.try_apply_event(set, table, event).await {
            Ok(report) => report,
            Err(e) => {
                warn!(table, error = %e, "dropping change event");
                ApplyReport::default()
            }
        }
    }
}

/// Merge one evaluation into `set` according to `mode`.
pub fn apply_evaluation(
    set: &mut AdmittedSet<FeedItem>,
    mode: Mode,
    evaluation: Evaluation,
) -> SetChange {
    match (mode, evaluation.item) {
        (Mode::Insert, Some(item)) => set.upsert(item),
        (Mode::Insert, None) => SetChange::Unchanged,
        (Mode::Update, item) => set.reconcile(&evaluation.id, item),
    }
}

/// Merge a whole fetch result into `set`.
pub fn apply_fetched(
    set: &mut AdmittedSet<FeedItem>,
    mode: Mode,
    fetched: Fetched,
) -> ApplyReport {
    let mut report = ApplyReport::default();
    match fetched {
        Fetched::Dish(evaluation) => {
            let id = evaluation.id.clone();
            report.record(&id, apply_evaluation(set, mode, evaluation));
        }
        Fetched::Restaurant {
            id,
            dishes,
            complete,
        } => {
            let seen: HashSet<String> = dishes.iter().map(|e| e.id.clone()).collect();
            for evaluation in dishes {
                let dish_id = evaluation.id.clone();
                report.record(&dish_id, apply_evaluation(set, mode, evaluation));
            }
            if complete {
                report.removed.extend(remove_restaurant(set, &id, &seen));
            }
        }
    }
    report
}

/// Remove members sold by `restaurant_id`, except those in `keep`.
pub fn remove_restaurant(
    set: &mut AdmittedSet<FeedItem>,
    restaurant_id: &str,
    keep: &HashSet<String>,
) -> Vec<String> {
    set.retain(|item| item.restaurant.id != restaurant_id || keep.contains(&item.dish.id))
}
