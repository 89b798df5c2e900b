//! Change events and subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{row_id, Row};

/// The kind of row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];
}

/// A row-level change, carrying enough of the row to re-fetch or re-evaluate it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert { new: Row },
    Update { old: Option<Row>, new: Row },
    Delete { old: Row },
}

impl ChangeEvent {
    /// Assemble an event from a `{eventType, new?, old?}` payload.
    ///
    /// Returns `None` when the row the kind requires is missing. An empty
    /// object counts as missing (some stores send `{}` for absent rows).
    pub fn from_parts(kind: ChangeKind, new: Option<Row>, old: Option<Row>) -> Option<Self> {
        let new = new.filter(|r| !r.is_empty());
        let old = old.filter(|r| !r.is_empty());
        match kind {
            ChangeKind::Insert => new.map(|new| ChangeEvent::Insert { new }),
            ChangeKind::Update => new.map(|new| ChangeEvent::Update { old, new }),
            ChangeKind::Delete => old.map(|old| ChangeEvent::Delete { old }),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The row the event is about: the new row, or the old one for deletes.
    pub fn row(&self) -> &Row {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => new,
            ChangeEvent::Delete { old } => old,
        }
    }

    pub fn row_id(&self) -> Option<&str> {
        row_id(self.row())
    }
}

/// A change event tagged with the table it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TableChange {
    pub table: String,
    pub event: ChangeEvent,
}

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Change(TableChange),
    /// The stream disconnected; nothing more will arrive.
    Closed { reason: String },
}

/// Handle that stops a subscription. Calling it more than once is harmless.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    active: Arc<AtomicBool>,
}

impl Default for Unsubscribe {
    fn default() -> Self {
        Self::new()
    }
}

impl Unsubscribe {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Receiving end of a change subscription.
///
/// Once unsubscribed, [`recv`](Subscription::recv) returns `None`, including
/// for messages that were already queued.
#[derive(Debug)]
pub struct Subscription {
    table: String,
    receiver: mpsc::UnboundedReceiver<StreamMessage>,
    handle: Unsubscribe,
}

impl Subscription {
    pub fn new(
        table: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<StreamMessage>,
        handle: Unsubscribe,
    ) -> Self {
        Self {
            table: table.into(),
            receiver,
            handle,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn handle(&self) -> Unsubscribe {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Next message, or `None` once unsubscribed or the sender is gone.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        if !self.handle.is_active() {
            return None;
        }
        let message = self.receiver.recv().await?;
        self.handle.is_active().then_some(message)
    }
}
