// src/shared_data.rs

use crate::models::emergency::{EmergencyStatus, RequestId};
use crate::models::hospital::HospitalId;
use crate::models::signal::SignalCommand;
use crate::models::vehicle::VehicleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the core tells the outside world. One event per transition and per signal action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchEvent {
    StatusChanged {
        request_id: RequestId,
        vehicle_id: VehicleId,
        from: Option<EmergencyStatus>,
        to: EmergencyStatus,
        hospital_id: HospitalId,
        at: DateTime<Utc>,
    },
    SignalCommandIssued(SignalCommand),
}

/// Flat row for CSV audit trails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyEventRecord {
    pub timestamp: String,
    pub request_id: String,
    pub kind: String,
    pub subject: String,
    pub detail: String,
}

impl From<&DispatchEvent> for EmergencyEventRecord {
    fn from(event: &DispatchEvent) -> Self {
        match event {
            DispatchEvent::StatusChanged {
                request_id,
                vehicle_id,
                from,
                to,
                hospital_id,
                at,
            } => EmergencyEventRecord {
                timestamp: at.to_rfc3339(),
                request_id: request_id.to_string(),
                kind: "status".to_string(),
                subject: vehicle_id.to_string(),
                detail: format!("{:?} -> {:?} (hospital {})", from, to, hospital_id),
            },
            DispatchEvent::SignalCommandIssued(command) => EmergencyEventRecord {
                timestamp: command.issued_at.to_rfc3339(),
                request_id: command.request_id.to_string(),
                kind: format!("{:?}", command.action).to_lowercase(),
                subject: command.signal_id.to_string(),
                detail: match command.expires_at {
                    Some(expiry) => format!("{:?} until {}", command.approach, expiry.to_rfc3339()),
                    None => format!("{:?}", command.approach),
                },
            },
        }
    }
}
