//! Store - the collaborator contracts the feed consumes.
//!
//! The feed never owns data. It reads rows from a hosted relational store and
//! listens to that store's row-level change stream:
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │ RowStore                     │      │ ChangeStream                 │
//! │  query(table, filter, limit) │      │  subscribe(table, kinds)     │
//! │  get_by_id(table, id)        │      │    -> Subscription           │
//! └──────────────────────────────┘      └──────────────────────────────┘
//!            │                                      │
//!            ▼                                      ▼
//!     SnapshotLoader / Reconciler            FeedSession worker
//! ```
//!
//! Rows are JSON objects. Embedding queries return a dish row with its parent
//! restaurant nested under `restaurant`; change events carry the raw row only.

mod change;
mod error;
mod in_memory;

use async_trait::async_trait;
use serde_json::Value;

pub use change::{ChangeEvent, ChangeKind, StreamMessage, Subscription, TableChange, Unsubscribe};
pub use error::StoreError;
pub use in_memory::{InMemoryStore, Relation};

/// A single row as a JSON object.
pub type Row = serde_json::Map<String, Value>;

/// Table names used by the feed.
pub mod tables {
    pub const DISHES: &str = "dishes";
    pub const RESTAURANTS: &str = "restaurants";
}

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

/// Read access to the backing store.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Fetch up to `limit` rows of `table`, optionally filtered.
    ///
    /// Tables with a configured relation come back with their parent embedded.
    async fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError>;

    /// Fetch one row by primary key, with the same embedding as [`query`](RowStore::query).
    async fn get_by_id(&self, table: &str, id: &str) -> Result<Option<Row>, StoreError>;
}

/// Row-level change notifications.
pub trait ChangeStream: Send + Sync {
    /// Start receiving events of `kinds` for `table`.
    fn subscribe(&self, table: &str, kinds: &[ChangeKind]) -> Result<Subscription, StoreError>;
}

/// Read the `id` column of a row.
pub fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}
