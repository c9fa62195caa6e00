use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::Result;
use crate::models::emergency::{EmergencyRequest, RequestId};
use crate::models::vehicle::{VehicleId, VehicleState};

/// Transitions a caller can ask a running lifecycle to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartJourney,
    ArrivedAtPickup,
    StartToHospital,
    Complete,
    Cancel,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::StartJourney => "start journey",
            Transition::ArrivedAtPickup => "arrive at pickup",
            Transition::StartToHospital => "start to hospital",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
        }
    }
}

pub(crate) enum LifecycleCommand {
    Transition(Transition, oneshot::Sender<Result<EmergencyRequest>>),
    Snapshot(oneshot::Sender<EmergencyRequest>),
}

/// Front door of a running lifecycle task.
pub(crate) struct LifecycleHandle {
    pub commands: mpsc::Sender<LifecycleCommand>,
    /// Latest position only; a newer report overwrites one the task has not read yet.
    pub positions: watch::Sender<Option<VehicleState>>,
}

pub(crate) enum Binding {
    /// Claimed by a `create` still selecting a hospital.
    Reserved,
    Active(RequestId),
}

/// Vehicle and request index. Guarded by one short-held lock and never held across
/// a lifecycle transition or a collaborator call.
pub(crate) struct Registry {
    pub vehicles: HashMap<VehicleId, VehicleState>,
    pub bindings: HashMap<VehicleId, Binding>,
    pub requests: HashMap<RequestId, LifecycleHandle>,
    /// Most recent closed requests, oldest first in `archive_order`.
    pub archive: HashMap<RequestId, EmergencyRequest>,
    archive_order: VecDeque<RequestId>,
    archive_capacity: usize,
}

impl Registry {
    pub fn new(archive_capacity: usize) -> Self {
        Self {
            vehicles: HashMap::new(),
            bindings: HashMap::new(),
            requests: HashMap::new(),
            archive: HashMap::new(),
            archive_order: VecDeque::new(),
            archive_capacity: archive_capacity.max(1),
        }
    }

    /// Moves a finished request into the archive and frees its vehicle.
    ///
    /// The route polyline is dropped; once the archive is full the oldest entry goes.
    pub fn archive(&mut self, mut request: EmergencyRequest) {
        let bound_here = matches!(
            self.bindings.get(&request.vehicle_id),
            Some(Binding::Active(id)) if *id == request.id
        );
        if bound_here {
            self.bindings.remove(&request.vehicle_id);
        }
        self.requests.remove(&request.id);
        log::info!(
            "[Registry] Request {} archived as {:?}; vehicle {} released",
            request.id,
            request.status,
            request.vehicle_id
        );
        request.selected_route = None;
        self.archive_order.push_back(request.id);
        self.archive.insert(request.id, request);
        while self.archive_order.len() > self.archive_capacity {
            if let Some(oldest) = self.archive_order.pop_front() {
                self.archive.remove(&oldest);
                log::debug!("[Registry] Request {} evicted from the archive", oldest);
            }
        }
    }

    pub fn active_request_for(&self, vehicle_id: &VehicleId) -> Option<RequestId> {
        match self.bindings.get(vehicle_id) {
            Some(Binding::Active(id)) => Some(*id),
            _ => None,
        }
    }
}
