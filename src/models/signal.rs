use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{Coordinate, TravelDirection};
use crate::models::emergency::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub String);

impl SignalId {
    pub fn new(id: impl Into<String>) -> Self {
        SignalId(id.into())
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signalised junction that can be driven into priority state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSignal {
    pub id: SignalId,
    pub coordinate: Coordinate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalAction {
    Grant,
    Extend,
    Release,
}

/// A live priority grant. At most one exists per signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalActivation {
    pub signal_id: SignalId,
    pub request_id: RequestId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Approach the vehicle is coming from; selects the phase the controller favours.
    pub approach: TravelDirection,
}

/// Command pushed to the signal-control collaborator. Idempotent, safe to resend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCommand {
    pub signal_id: SignalId,
    pub request_id: RequestId,
    pub action: SignalAction,
    pub approach: TravelDirection,
    pub issued_at: DateTime<Utc>,
    /// End of the priority window for grant/extend, `None` for release.
    pub expires_at: Option<DateTime<Utc>>,
}
