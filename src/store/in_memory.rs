//! InMemoryStore - HashMap-backed store and change stream for tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    row_id, ChangeEvent, ChangeKind, ChangeStream, Filter, Row, RowStore, StoreError,
    StreamMessage, Subscription, TableChange, Unsubscribe,
};

/// Embeds a parent row into child rows on read, like a PostgREST join.
///
/// Reading `table` looks up `parent_table` by the child's `foreign_key` column
/// and nests the parent (or `null`) under `embed_as`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub table: String,
    pub foreign_key: String,
    pub parent_table: String,
    pub embed_as: String,
}

impl Relation {
    pub fn new(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        parent_table: impl Into<String>,
        embed_as: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_key: foreign_key.into(),
            parent_table: parent_table.into(),
            embed_as: embed_as.into(),
        }
    }
}

struct Subscriber {
    table: String,
    kinds: Vec<ChangeKind>,
    sender: mpsc::UnboundedSender<StreamMessage>,
    handle: Unsubscribe,
}

#[derive(Default)]
struct Faults {
    queries: Vec<StoreError>,
    lookups: HashMap<String, StoreError>,
}

type Tables = HashMap<String, IndexMap<String, Row>>;

/// In-memory rows plus a change stream.
///
/// Clone-friendly via Arc: clones share rows, relations and subscribers.
/// Mutations through [`insert`](Self::insert), [`update`](Self::update) and
/// [`delete`](Self::delete) publish change events; [`seed`](Self::seed) does not.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    relations: Arc<RwLock<Vec<Relation>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relation(self, relation: Relation) -> Self {
        if let Ok(mut relations) = self.relations.write() {
            relations.push(relation);
        }
        self
    }

    /// Store a row without publishing an event.
    pub fn seed(&self, table: &str, row: Row) -> Result<(), StoreError> {
        let id = Self::require_id(&row)?;
        self.write_tables()?
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
        Ok(())
    }

    /// Store a row and publish an `Insert`.
    pub fn insert(&self, table: &str, row: Row) -> Result<(), StoreError> {
        self.seed(table, row.clone())?;
        self.publish(TableChange {
            table: table.to_string(),
            event: ChangeEvent::Insert { new: row },
        })
    }

    /// Merge `patch` into an existing row and publish an `Update`.
    ///
    /// Returns the new row, or `None` if there was no row with `id`.
    pub fn update(&self, table: &str, id: &str, patch: Row) -> Result<Option<Row>, StoreError> {
        let (old, new) = {
            let mut tables = self.write_tables()?;
            let Some(row) = tables.get_mut(table).and_then(|rows| rows.get_mut(id)) else {
                return Ok(None);
            };
            let old = row.clone();
            for (column, value) in patch {
                if column != "id" {
                    row.insert(column, value);
                }
            }
            (old, row.clone())
        };

        self.publish(TableChange {
            table: table.to_string(),
            event: ChangeEvent::Update {
                old: Some(old),
                new: new.clone(),
            },
        })?;
        Ok(Some(new))
    }

    /// Remove a row and publish a `Delete`. Returns the removed row.
    pub fn delete(&self, table: &str, id: &str) -> Result<Option<Row>, StoreError> {
        let removed = self
            .write_tables()?
            .get_mut(table)
            .and_then(|rows| rows.shift_remove(id));

        if let Some(old) = &removed {
            self.publish(TableChange {
                table: table.to_string(),
                event: ChangeEvent::Delete { old: old.clone() },
            })?;
        }
        Ok(removed)
    }

    /// Raw row, without embedding.
    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        self.tables
            .read()
            .ok()?
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Deliver `change` to matching subscribers without touching stored rows.
    pub fn publish(&self, change: TableChange) -> Result<(), StoreError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::LockPoisoned("publish"))?;

        let kind = change.event.kind();
        subscribers.retain(|sub| {
            if !sub.handle.is_active() {
                return false;
            }
            if sub.table != change.table || !sub.kinds.contains(&kind) {
                return true;
            }
            sub.sender
                .send(StreamMessage::Change(change.clone()))
                .is_ok()
        });

        debug!(table = %change.table, ?kind, id = ?change.event.row_id(), "published change");
        Ok(())
    }

    /// Close every subscription with `reason`, as if the connection dropped.
    pub fn disconnect(&self, reason: &str) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            for sub in subscribers.drain(..) {
                let _ = sub.sender.send(StreamMessage::Closed {
                    reason: reason.to_string(),
                });
            }
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|s| s.handle.is_active()).count())
            .unwrap_or(0)
    }

    /// Make the next `count` queries fail with `error`.
    pub fn fail_queries(&self, count: usize, error: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.queries.extend(std::iter::repeat(error).take(count));
        }
    }

    /// Make every lookup of `id` fail with `error` until faults are cleared.
    pub fn fail_lookups(&self, id: &str, error: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.lookups.insert(id.to_string(), error);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }

    fn require_id(row: &Row) -> Result<String, StoreError> {
        row_id(row)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Server("row has no string id".into()))
    }

    fn write_tables(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))
    }

    fn take_query_fault(&self) -> Result<(), StoreError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::LockPoisoned("query"))?;
        if faults.queries.is_empty() {
            Ok(())
        } else {
            Err(faults.queries.remove(0))
        }
    }

    fn lookup_fault(&self, id: &str) -> Result<(), StoreError> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::LockPoisoned("lookup"))?;
        match faults.lookups.get(id) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn embed(&self, tables: &Tables, table: &str, mut row: Row) -> Result<Row, StoreError> {
        let relations = self
            .relations
            .read()
            .map_err(|_| StoreError::LockPoisoned("relations"))?;

        for relation in relations.iter().filter(|r| r.table == table) {
            let parent = row
                .get(&relation.foreign_key)
                .and_then(Value::as_str)
                .and_then(|parent_id| {
                    tables
                        .get(&relation.parent_table)
                        .and_then(|rows| rows.get(parent_id))
                })
                .cloned()
                .map(Value::Object)
                .unwrap_or(Value::Null);
            row.insert(relation.embed_as.clone(), parent);
        }

        Ok(row)
    }

    fn select(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;

        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };

        rows.values()
            .filter(|row| filter.map_or(true, |f| f.matches(row)))
            .take(limit)
            .map(|row| self.embed(&tables, table, row.clone()))
            .collect()
    }

    fn select_one(&self, table: &str, id: &str) -> Result<Option<Row>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;

        match tables.get(table).and_then(|rows| rows.get(id)) {
            Some(row) => self.embed(&tables, table, row.clone()).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RowStore for InMemoryStore {
    async fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        self.take_query_fault()?;
        self.select(table, filter, limit)
    }

    async fn get_by_id(&self, table: &str, id: &str) -> Result<Option<Row>, StoreError> {
        self.lookup_fault(id)?;
        self.select_one(table, id)
    }
}

impl ChangeStream for InMemoryStore {
    fn subscribe(&self, table: &str, kinds: &[ChangeKind]) -> Result<Subscription, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = Unsubscribe::new();

        self.subscribers
            .lock()
            .map_err(|_| StoreError::LockPoisoned("subscribe"))?
            .push(Subscriber {
                table: table.to_string(),
                kinds: kinds.to_vec(),
                sender,
                handle: handle.clone(),
            });

        Ok(Subscription::new(table, receiver, handle))
    }
}
