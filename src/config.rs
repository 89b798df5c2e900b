//! Feed configuration.
//!
//! Hosts can embed [`FeedConfig`] in their own config file (every field has a
//! default) or read it from the environment with [`FeedConfig::from_env`].

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_MAX_DISTANCE_KM: f64 = 15.0;
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 100;

pub const MAX_DISTANCE_VAR: &str = "FEED_MAX_DISTANCE_KM";
pub const SNAPSHOT_LIMIT_VAR: &str = "FEED_SNAPSHOT_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Admission radius around the viewer.
    pub max_distance_km: f64,
    /// Row cap for the snapshot query. There is no pagination past it.
    pub snapshot_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }
}

impl FeedConfig {
    /// Read `FEED_MAX_DISTANCE_KM` and `FEED_SNAPSHOT_LIMIT`, defaulting unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            max_distance_km: try_load(&lookup, MAX_DISTANCE_VAR, DEFAULT_MAX_DISTANCE_KM)?,
            snapshot_limit: try_load(&lookup, SNAPSHOT_LIMIT_VAR, DEFAULT_SNAPSHOT_LIMIT)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_distance_km.is_finite() || self.max_distance_km <= 0.0 {
            return Err(ConfigError::Invalid {
                key: MAX_DISTANCE_VAR.into(),
                reason: format!("must be a positive distance, got {}", self.max_distance_km),
            });
        }
        if self.snapshot_limit == 0 {
            return Err(ConfigError::Invalid {
                key: SNAPSHOT_LIMIT_VAR.into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn try_load<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
