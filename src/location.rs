//! Device geolocation, consumed once per session activation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::Coordinates;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// A human-readable place, for display only. Never used for filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub city: Option<String>,
    pub country: Option<String>,
}

impl Place {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            country: Some(country.into()),
        }
    }
}

/// Source of the viewer's position.
#[async_trait]
pub trait Geolocator: Send + Sync {
    /// One-shot current position.
    async fn current_position(&self) -> Result<Coordinates, LocationError>;

    /// Look up the place at `at`.
    async fn reverse_geocode(&self, at: Coordinates) -> Result<Place, LocationError>;
}

/// A geolocator that always reports the same answer.
#[derive(Debug, Clone)]
pub struct FixedGeolocator {
    position: Result<Coordinates, LocationError>,
    place: Option<Place>,
}

impl FixedGeolocator {
    pub fn new(position: Coordinates) -> Self {
        Self {
            position: Ok(position),
            place: None,
        }
    }

    /// A geolocator whose position lookups fail with `error`.
    pub fn failing(error: LocationError) -> Self {
        Self {
            position: Err(error),
            place: None,
        }
    }

    pub fn with_place(mut self, place: Place) -> Self {
        self.place = Some(place);
        self
    }
}

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        self.position.clone()
    }

    async fn reverse_geocode(&self, _at: Coordinates) -> Result<Place, LocationError> {
        self.place
            .clone()
            .ok_or_else(|| LocationError::Unavailable("no place for position".into()))
    }
}
