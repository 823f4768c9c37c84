use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed coordinate pair the pipeline observes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    /// Denver International Airport.
    pub const DEFAULT: Location = Location { lat: 39.847, lon: -104.656 };
}

impl Default for Location {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Renders as `{lat}_{lon}`, the object-key segment used for this location.
///
/// Whole-number coordinates keep their fractional part (`40.0`, not `40`).
impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}_{:?}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMain {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCoord {
    pub lon: f64,
    pub lat: f64,
}

/// The subset of the current-weather response the pipeline reads.
///
/// Integer measurements (pressure, humidity) are widened to `f64` on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawObservation {
    pub main: RawMain,
    pub coord: RawCoord,
    pub dt: i64,
}

/// One flattened observation, in destination column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRow {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
    pub lon: f64,
    pub lat: f64,
}

impl TryFrom<RawObservation> for ObservationRow {
    type Error = i64;

    /// Fails with the offending `dt` if it is outside chrono's range.
    fn try_from(raw: RawObservation) -> Result<Self, Self::Error> {
        let timestamp = DateTime::from_timestamp(raw.dt, 0).ok_or(raw.dt)?;

        Ok(Self {
            temp: raw.main.temp,
            feels_like: raw.main.feels_like,
            temp_min: raw.main.temp_min,
            temp_max: raw.main.temp_max,
            pressure: raw.main.pressure,
            humidity: raw.main.humidity,
            timestamp,
            lon: raw.coord.lon,
            lat: raw.coord.lat,
        })
    }
}
