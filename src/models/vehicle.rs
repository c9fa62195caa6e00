use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::geo::Coordinate;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        VehicleId(id.into())
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One position report pushed by the vehicle telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryUpdate {
    pub vehicle_id: VehicleId,
    pub coordinate: Coordinate,
    pub heading_degrees: f64,
    pub speed_kmh: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryUpdate {
    pub fn validate(&self) -> Result<()> {
        self.coordinate.validate()?;
        if !self.heading_degrees.is_finite() {
            return Err(DispatchError::InvalidInput(format!(
                "heading {} is not a number",
                self.heading_degrees
            )));
        }
        if !self.speed_kmh.is_finite() || self.speed_kmh < 0.0 {
            return Err(DispatchError::InvalidInput(format!(
                "speed {} km/h is not a valid reading",
                self.speed_kmh
            )));
        }
        Ok(())
    }
}

/// Last known state of a vehicle. Never deleted, only marked inactive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub id: VehicleId,
    pub coordinate: Coordinate,
    pub heading_degrees: f64,
    pub speed_kmh: f64,
    pub last_update: DateTime<Utc>,
    pub active: bool,
}

impl VehicleState {
    pub fn from_update(update: &TelemetryUpdate) -> Self {
        Self {
            id: update.vehicle_id.clone(),
            coordinate: update.coordinate,
            heading_degrees: update.heading_degrees,
            speed_kmh: update.speed_kmh,
            last_update: update.timestamp,
            active: true,
        }
    }

    /// Applies `update` only when it is newer than what we already hold.
    /// Returns whether the state changed.
    pub fn apply(&mut self, update: &TelemetryUpdate) -> bool {
        if update.timestamp <= self.last_update {
            return false;
        }
        self.coordinate = update.coordinate;
        self.heading_degrees = update.heading_degrees;
        self.speed_kmh = update.speed_kmh;
        self.last_update = update.timestamp;
        self.active = true;
        true
    }

    /// Staleness flag for dashboards. Not an error and never drives a transition.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.last_update > stale_after
    }
}
