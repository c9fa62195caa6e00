// collaborators/mod.rs
//
// Contracts the dispatch core uses to reach the outside world. Routing and capacity are
// remote lookups and therefore async; signal lookups are local and signal commands are
// fire-and-forget, so those two stay synchronous.

pub mod in_memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::geo::Coordinate;
use crate::models::emergency::Route;
use crate::models::hospital::{HospitalCapacitySnapshot, HospitalId};
use crate::models::signal::{SignalCommand, TrafficSignal};

pub use in_memory::{InMemoryCapacityBoard, InMemorySignalDirectory, LoggingSignalControl, StraightLineRouter};

#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Any failure must be reported as `RouteUnavailable`.
    async fn get_route(&self, origin: Coordinate, destination: Coordinate) -> Result<Route>;
}

#[async_trait]
pub trait CapacityProvider: Send + Sync {
    async fn snapshots(&self) -> Result<Vec<HospitalCapacitySnapshot>>;
    /// Counts one more patient heading to `hospital_id`.
    async fn record_assignment(&self, hospital_id: &HospitalId) -> Result<()>;
    /// Undoes `record_assignment` once the request is closed.
    async fn release_assignment(&self, hospital_id: &HospitalId) -> Result<()>;
}

pub trait SignalDirectory: Send + Sync {
    /// Signals within `corridor_width_m` of the polyline, in route order.
    fn signals_near(&self, polyline: &[Coordinate], corridor_width_m: f64) -> Vec<TrafficSignal>;
}

/// Accepts grant/extend/release commands. No acknowledgement is expected.
pub trait SignalControl: Send + Sync {
    fn send(&self, command: &SignalCommand);
}
