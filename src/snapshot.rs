//! Snapshot loader: one bulk read that establishes the baseline feed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::admitted::AdmittedSet;
use crate::error::FeedError;
use crate::geo::ProximityFilter;
use crate::model::{DishRecord, FeedItem};
use crate::store::{row_id, tables, RowStore};

/// Loads all candidate dishes (with their restaurant embedded) in a single
/// query and keeps the ones the filter admits.
///
/// The query is capped at `limit` rows and never paginates. Past that many
/// dishes the feed is silently incomplete; a warning is logged when the cap is
/// hit. Pagination would have to be reconciled against live events and is not
/// attempted here.
pub struct SnapshotLoader<S: ?Sized> {
    store: Arc<S>,
    limit: usize,
}

impl<S: ?Sized> Clone for SnapshotLoader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            limit: self.limit,
        }
    }
}

impl<S: RowStore + ?Sized> SnapshotLoader<S> {
    pub fn new(store: Arc<S>, limit: usize) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run the bulk query and return the admitted subset, in query order.
    ///
    /// Rows that fail to decode are skipped. A failed query is `LoadFailed`;
    /// there is no retry here.
    pub async fn load(
        &self,
        filter: ProximityFilter,
    ) -> Result<AdmittedSet<FeedItem>, FeedError> {
        debug!(limit = self.limit, "loading snapshot");

        let rows = self
            .store
            .query(tables::DISHES, None, self.limit)
            .await
            .map_err(|e| {
                warn!(error = %e, "snapshot query failed");
                FeedError::LoadFailed(e)
            })?;

        if rows.len() >= self.limit {
            warn!(
                limit = self.limit,
                "snapshot hit its row limit; dishes past it are not in the feed"
            );
        }

        let total = rows.len();
        let admitted: AdmittedSet<FeedItem> = rows
            .iter()
            .filter_map(|row| match DishRecord::from_row(row) {
                Ok(record) => filter.evaluate(record),
                Err(e) => {
                    debug!(id = ?row_id(row), error = %e, "skipping malformed dish row");
                    None
                }
            })
            .collect();

        info!(admitted = admitted.len(), total, "snapshot loaded");
        Ok(admitted)
    }

    /// Load and replace `set` only if the load succeeds.
    pub async fn reload(
        &self,
        set: &mut AdmittedSet<FeedItem>,
        filter: ProximityFilter,
    ) -> Result<usize, FeedError> {
        let fresh = self.load(filter).await?;
        *set = fresh;
        Ok(set.len())
    }
}
