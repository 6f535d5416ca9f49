//! The normalized position record produced by provider plug-ins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PositionError;

/// A single GPS/position fix, normalized from whatever a provider plug-in returned.
///
/// Plug-ins construct these; once handed to a [`crate::cot::CotEvent`] builder a `Position`
/// is no longer retained: plug-ins must not keep references to the `Position`s they return
/// after the call that produced them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub uid: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    pub altitude: Option<f64>,
    pub speed_mps: Option<f64>,
    pub course_deg: Option<f64>,
    pub description: Option<String>,
    pub cot_type_hint: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Position {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, lat: f64, lon: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            lat,
            lon,
            timestamp,
            altitude: None,
            speed_mps: None,
            course_deg: None,
            description: None,
            cot_type_hint: None,
            extra: HashMap::new(),
        }
    }

    /// Validates the invariants a `Position` must hold: latitude/longitude in range,
    /// a non-empty uid, and a timestamp that isn't a sentinel/NaN value.
    pub fn validate(&self) -> Result<(), PositionError> {
        if self.uid.trim().is_empty() {
            return Err(PositionError::MissingUid);
        }
        if !(-90.0..=90.0).contains(&self.lat) || self.lat.is_nan() {
            return Err(PositionError::InvalidLatitude(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) || self.lon.is_nan() {
            return Err(PositionError::InvalidLongitude(self.lon));
        }
        if let Some(alt) = self.altitude {
            if alt.is_nan() {
                return Err(PositionError::InvalidAltitude(alt));
            }
        }
        Ok(())
    }
}
