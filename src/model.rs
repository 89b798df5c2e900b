//! Rows the feed works with: dishes, the restaurants that sell them, and the
//! admitted feed items built from both.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::store::Row;

/// Anything held in an [`AdmittedSet`](crate::AdmittedSet) is keyed by a
/// stable string id.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Whether a restaurant is taking orders.
///
/// Any status other than `closed` is treated as available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Open,
    Closed,
    #[serde(other)]
    Unknown,
}

impl Availability {
    pub fn is_available(self) -> bool {
        self != Availability::Closed
    }
}

/// The location-bearing parent of a dish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub availability: Availability,
}

impl Restaurant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, at: Coordinates) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude: Some(at.latitude),
            longitude: Some(at.longitude),
            availability: Availability::Open,
        }
    }

    /// Usable coordinates, if the row has them.
    pub fn location(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.latitude, self.longitude)
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    pub fn to_row(&self) -> Row {
        to_row(self)
    }
}

/// A sellable dish as stored in the `dishes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub id: String,
    #[serde(default)]
    pub restaurant_id: Option<String>,
    #[serde(alias = "is_active")]
    pub active: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Dish {
    pub fn new(
        id: impl Into<String>,
        restaurant_id: impl Into<String>,
        name: impl Into<String>,
        price: f64,
    ) -> Self {
        Self {
            id: id.into(),
            restaurant_id: Some(restaurant_id.into()),
            active: true,
            name: name.into(),
            price,
            image_url: None,
        }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn from_row(row: &Row) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(row.clone()))
    }

    pub fn to_row(&self) -> Row {
        to_row(self)
    }
}

impl Keyed for Dish {
    fn key(&self) -> &str {
        &self.id
    }
}

/// A dish joined with its restaurant, as returned by an embedding query.
///
/// `restaurant` is `None` when the parent could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishRecord {
    #[serde(flatten)]
    pub dish: Dish,
    #[serde(default)]
    pub restaurant: Option<Restaurant>,
}

impl DishRecord {
    /// Decode a joined row. The parent is expected under the `restaurant` key.
    pub fn from_row(row: &Row) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(row.clone()))
    }

    pub fn restaurant_id(&self) -> Option<&str> {
        self.restaurant
            .as_ref()
            .map(|r| r.id.as_str())
            .or(self.dish.restaurant_id.as_deref())
    }
}

/// An admitted dish, annotated with its distance from the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub dish: Dish,
    pub restaurant: Restaurant,
    pub distance_km: f64,
}

impl Keyed for FeedItem {
    fn key(&self) -> &str {
        &self.dish.id
    }
}

fn to_row<T: Serialize>(value: &T) -> Row {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(row)) => row,
        _ => Row::new(),
    }
}
