//! Cart - existence/flag reconciliation for dishes a shopper already picked.
//!
//! Unlike the feed there is no join and no distance: the flag that matters
//! (`active`) lives on the dish row itself, so change events are applied from
//! their payload without a re-fetch. A dish that goes inactive or is deleted
//! drops out of the cart; a dish that changes otherwise is refreshed in place.
//! Inserts never add anything, since only the shopper adds lines.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::admitted::{AdmittedSet, SetChange};
use crate::model::{Dish, Keyed};
use crate::store::{row_id, ChangeEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("dish {0} is not available")]
    Inactive(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub dish: Dish,
    pub quantity: u32,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.dish.price * f64::from(self.quantity)
    }
}

impl Keyed for CartLine {
    fn key(&self) -> &str {
        &self.dish.id
    }
}

/// Lines in the order they were first added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: AdmittedSet<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` of `dish`, returning the line's new quantity.
    ///
    /// Adding a dish already in the cart bumps its quantity and takes the
    /// newer dish data. A zero quantity changes nothing.
    pub fn add(&mut self, dish: Dish, quantity: u32) -> Result<u32, CartError> {
        if !dish.active {
            return Err(CartError::Inactive(dish.id));
        }
        if quantity == 0 {
            return Ok(self.lines.get(&dish.id).map_or(0, |line| line.quantity));
        }
        let quantity = match self.lines.get(&dish.id) {
            Some(line) => line.quantity.saturating_add(quantity),
            None => quantity,
        };
        self.lines.upsert(CartLine { dish, quantity });
        Ok(quantity)
    }

    /// Set a line's quantity. Zero removes the line.
    pub fn set_quantity(&mut self, id: &str, quantity: u32) -> SetChange {
        if quantity == 0 {
            return self.lines.remove(id);
        }
        match self.lines.get_mut(id) {
            Some(line) if line.quantity != quantity => {
                line.quantity = quantity;
                SetChange::Replaced
            }
            _ => SetChange::Unchanged,
        }
    }

    pub fn remove(&mut self, id: &str) -> SetChange {
        self.lines.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&CartLine> {
        self.lines.get(id)
    }

    pub fn lines(&self) -> impl Iterator<Item = &CartLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of quantities across lines.
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Apply a `dishes` change event.
    ///
    /// An update row that does not decode as a dish is treated as inactive.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> SetChange {
        match event {
            ChangeEvent::Insert { .. } => SetChange::Unchanged,
            ChangeEvent::Delete { old } => match row_id(old) {
                Some(id) => self.lines.remove(id),
                None => SetChange::Unchanged,
            },
            ChangeEvent::Update { new, .. } => {
                let Some(id) = row_id(new) else {
                    return SetChange::Unchanged;
                };
                match Dish::from_row(new) {
                    Ok(dish) if dish.active => self.refresh(dish),
                    Ok(_) => self.lines.remove(id),
                    Err(e) => {
                        debug!(id, error = %e, "undecodable dish update, dropping from cart");
                        self.lines.remove(id)
                    }
                }
            }
        }
    }

    fn refresh(&mut self, dish: Dish) -> SetChange {
        match self.lines.get(&dish.id) {
            Some(line) => {
                let quantity = line.quantity;
                self.lines.upsert(CartLine { dish, quantity })
            }
            None => SetChange::Unchanged,
        }
    }
}
