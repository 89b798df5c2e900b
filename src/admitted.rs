//! AdmittedSet - ordered, id-keyed collection of visible items.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::Keyed;

/// How a single mutation changed an [`AdmittedSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetChange {
    /// A new member was appended.
    Inserted,
    /// An existing member was replaced in place with a different value.
    Replaced,
    /// A member was removed.
    Removed,
    /// Membership and contents are as they were.
    Unchanged,
}

impl SetChange {
    pub fn is_change(self) -> bool {
        self != SetChange::Unchanged
    }
}

/// Items currently considered visible, in insertion order.
///
/// Keys are unique. Replacing a member keeps its position; removing one keeps
/// the relative order of the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de> + Keyed"))]
#[serde(from = "Vec<T>", into = "Vec<T>")]
pub struct AdmittedSet<T: Keyed + Clone> {
    items: IndexMap<String, T>,
}

impl<T: Keyed + Clone> Default for AdmittedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + Clone> AdmittedSet<T> {
    pub fn new() -> Self {
        Self {
            items: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.items.get_mut(key)
    }

    /// Position of `key` in the ordered sequence.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.items.get_index_of(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }

    /// Remove the member with `key`. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &str) -> SetChange {
        match self.items.shift_remove(key) {
            Some(_) => SetChange::Removed,
            None => SetChange::Unchanged,
        }
    }

    /// Keep only members matching `keep`, returning the keys that were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.items.retain(|key, item| {
            let kept = keep(item);
            if !kept {
                dropped.push(key.clone());
            }
            kept
        });
        dropped
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Keyed + Clone + PartialEq> AdmittedSet<T> {
    /// Append `item`, or replace the member with the same key in place.
    pub fn upsert(&mut self, item: T) -> SetChange {
        match self.items.get_mut(item.key()) {
            Some(existing) if *existing == item => SetChange::Unchanged,
            Some(existing) => {
                *existing = item;
                SetChange::Replaced
            }
            None => {
                self.items.insert(item.key().to_string(), item);
                SetChange::Inserted
            }
        }
    }

    /// Bring the member for `key` in line with a fresh admission decision.
    ///
    /// `Some(item)` means admitted: append when absent, replace in place when
    /// present. `None` means rejected: remove when present.
    pub fn reconcile(&mut self, key: &str, admitted: Option<T>) -> SetChange {
        match admitted {
            Some(item) => self.upsert(item),
            None => self.remove(key),
        }
    }
}

impl<T: Keyed + Clone> From<Vec<T>> for AdmittedSet<T> {
    fn from(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }
}

impl<T: Keyed + Clone> From<AdmittedSet<T>> for Vec<T> {
    fn from(set: AdmittedSet<T>) -> Self {
        set.items.into_values().collect()
    }
}

impl<T: Keyed + Clone> FromIterator<T> for AdmittedSet<T> {
    /// Later items with a repeated key replace earlier ones at the earlier position.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut items = IndexMap::new();
        for item in iter {
            items.insert(item.key().to_string(), item);
        }
        Self { items }
    }
}
