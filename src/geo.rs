//! Geospatial admission filter.
//!
//! Distances are great-circle distances on a spherical Earth (haversine).
//! Precision degrades near the poles and for near-antipodal points; that loss
//! is accepted and not corrected for. Results are deterministic: the same
//! inputs always produce the same output.

use serde::{Deserialize, Serialize};

use crate::model::{DishRecord, FeedItem};

/// Mean Earth radius used by [`distance_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance reported when the target has no usable coordinates.
///
/// Large enough that any sane radius rejects it, so callers can filter with a
/// single comparison.
pub const UNKNOWN_DISTANCE_KM: f64 = 9999.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build coordinates from nullable columns.
    ///
    /// Returns `None` when either component is missing, zero, or not finite.
    /// A zero component is how unset locations show up in the backing store,
    /// so a point exactly on the equator or prime meridian counts as unknown.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        let (latitude, longitude) = (latitude?, longitude?);
        let usable = |v: f64| v.is_finite() && v != 0.0;
        if usable(latitude) && usable(longitude) {
            Some(Self::new(latitude, longitude))
        } else {
            None
        }
    }
}

/// Great-circle distance in kilometres from `from` to `to`.
///
/// Returns [`UNKNOWN_DISTANCE_KM`] when `to` is `None` or not usable.
pub fn distance_km(from: Coordinates, to: Option<Coordinates>) -> f64 {
    let Some(to) = to.and_then(|c| Coordinates::from_parts(Some(c.latitude), Some(c.longitude)))
    else {
        return UNKNOWN_DISTANCE_KM;
    };

    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // rounding can push h a hair outside [0, 1] for antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Whether `record` is visible to a viewer at `viewer` within `max_distance_km`.
pub fn admit(record: &DishRecord, viewer: Coordinates, max_distance_km: f64) -> bool {
    admitted_distance(record, viewer, max_distance_km).is_some()
}

/// The distance at which `record` is admitted, or `None` if it is rejected.
///
/// Rejected when the dish is inactive, the restaurant is unresolved, closed or
/// has no coordinates, or lies farther than `max_distance_km`. Missing
/// coordinates are rejected outright, whatever the radius.
pub fn admitted_distance(
    record: &DishRecord,
    viewer: Coordinates,
    max_distance_km: f64,
) -> Option<f64> {
    if !record.dish.active {
        return None;
    }
    let restaurant = record.restaurant.as_ref()?;
    if !restaurant.availability.is_available() {
        return None;
    }

    let location = restaurant.location()?;

    let distance = distance_km(viewer, Some(location));
    (distance <= max_distance_km).then_some(distance)
}

/// Viewer position and radius bundled for repeated evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityFilter {
    pub viewer: Coordinates,
    pub max_distance_km: f64,
}

impl ProximityFilter {
    pub fn new(viewer: Coordinates, max_distance_km: f64) -> Self {
        Self {
            viewer,
            max_distance_km,
        }
    }

    pub fn admits(&self, record: &DishRecord) -> bool {
        admit(record, self.viewer, self.max_distance_km)
    }

    /// Turn a joined record into a feed item, or `None` if it is rejected.
    pub fn evaluate(&self, record: DishRecord) -> Option<FeedItem> {
        let distance_km = admitted_distance(&record, self.viewer, self.max_distance_km)?;
        let DishRecord { dish, restaurant } = record;
        restaurant.map(|restaurant| FeedItem {
            dish,
            restaurant,
            distance_km,
        })
    }
}
