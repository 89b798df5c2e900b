use thiserror::Error;

use crate::config::ConfigError;
use crate::location::LocationError;
use crate::store::StoreError;

/// Errors surfaced by the feed.
///
/// Only `LoadFailed`, `Location`, `Config` and `SessionClosed` are returned to callers
/// as failures. `RefetchFailed` is swallowed per event and counted, and
/// `SubscriptionError` is reported as a degraded stream on the feed view.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    /// The snapshot query failed. Any previously admitted set is untouched.
    #[error("snapshot load failed: {0}")]
    LoadFailed(StoreError),

    /// Re-fetching the row behind one change event failed or found nothing.
    #[error("re-fetch of {key} failed: {reason}")]
    RefetchFailed { key: String, reason: String },

    /// The change stream for `table` is gone; the feed may be stale.
    #[error("change stream for {table} lost: {reason}")]
    SubscriptionError { table: String, reason: String },

    /// The viewer position could not be resolved at activation.
    #[error("viewer position unavailable: {0}")]
    Location(#[from] LocationError),

    /// The session was given an unusable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session has been torn down.
    #[error("feed session closed")]
    SessionClosed,
}

impl FeedError {
    pub(crate) fn refetch(key: impl Into<String>, reason: impl ToString) -> Self {
        FeedError::RefetchFailed {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
