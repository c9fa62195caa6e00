use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;
use crate::models::hospital::HospitalId;
use crate::models::signal::SignalId;
use crate::models::vehicle::VehicleId;

/// Emergency token. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn generate() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an emergency request. Only ever advances along
/// `Created → HospitalAssigned → EnRouteToPickup → AtPickup → EnRouteToHospital → Completed`,
/// or jumps to `Cancelled` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmergencyStatus {
    Created,
    HospitalAssigned,
    EnRouteToPickup,
    AtPickup,
    EnRouteToHospital,
    Completed,
    Cancelled,
}

impl EmergencyStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EmergencyStatus::Completed | EmergencyStatus::Cancelled)
    }

    /// States in which position updates drive the green corridor.
    pub fn is_en_route(self) -> bool {
        matches!(
            self,
            EmergencyStatus::EnRouteToPickup | EmergencyStatus::EnRouteToHospital
        )
    }
}

/// Polyline supplied by the routing collaborator. Opaque to the core apart from
/// being used to look up the signals along it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub polyline: Vec<Coordinate>,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRequest {
    pub id: RequestId,
    pub vehicle_id: VehicleId,
    pub pickup: Coordinate,
    pub assigned_hospital_id: HospitalId,
    pub hospital_coordinate: Coordinate,
    pub hospital_score: f64,
    pub status: EmergencyStatus,
    pub created_at: DateTime<Utc>,
    /// Every state entered, in order, with the time it was entered.
    pub transitions: Vec<(EmergencyStatus, DateTime<Utc>)>,
    pub selected_route: Option<Route>,
    pub active_signal_ids: BTreeSet<SignalId>,
    /// Seconds to the current leg's target; `None` while unknown.
    pub eta_seconds: Option<f64>,
}
