use crate::models::emergency::{EmergencyStatus, RequestId};
use crate::models::vehicle::VehicleId;

/// Every failure the dispatch core reports to its callers.
///
/// A failed call never leaves partial state behind: a rejected transition keeps the
/// request in its last valid state so the caller may retry or cancel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("vehicle {0} is already bound to an active emergency")]
    VehicleBusy(VehicleId),
    #[error("cannot {attempted} while request is {from:?}")]
    InvalidTransition {
        from: EmergencyStatus,
        attempted: &'static str,
    },
    #[error("no hospital is currently accepting patients")]
    NoAvailableHospital,
    #[error("route unavailable: {0}")]
    RouteUnavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown emergency request {0}")]
    UnknownRequest(RequestId),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
