use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::{DispatchError, Result};
use crate::geo::{distance_meters, eta_seconds, Coordinate};
use crate::hospital_selector::select_hospital;
use crate::lifecycle::DispatchContext;
use crate::models::emergency::{EmergencyRequest, EmergencyStatus, RequestId, Route};
use crate::models::hospital::HospitalCapacitySnapshot;
use crate::models::signal::{SignalCommand, TrafficSignal};
use crate::models::vehicle::VehicleState;
use crate::shared_data::DispatchEvent;

/// Owns one emergency request from creation to closure.
///
/// Every transition checks the current status first and refuses out-of-order calls with
/// `InvalidTransition`, leaving the request untouched. Signal grants are released on
/// every path into a terminal state, and only once.
pub struct EmergencyLifecycle {
    request: EmergencyRequest,
    vehicle: VehicleState,
    route_signals: Vec<TrafficSignal>,
    ctx: DispatchContext,
}

impl EmergencyLifecycle {
    /// Selects a hospital for `pickup` and opens the request in `HospitalAssigned`.
    ///
    /// The caller guarantees `vehicle` is not bound to another active request.
    pub fn create(
        vehicle: VehicleState,
        pickup: Coordinate,
        hospitals: &[HospitalCapacitySnapshot],
        ctx: DispatchContext,
    ) -> Result<Self> {
        pickup.validate()?;
        let selection = select_hospital(pickup, hospitals, &ctx.config.selector)?;
        let now = Utc::now();

        let request = EmergencyRequest {
            id: RequestId::generate(),
            vehicle_id: vehicle.id.clone(),
            pickup,
            assigned_hospital_id: selection.hospital_id,
            hospital_coordinate: selection.coordinate,
            hospital_score: selection.score,
            status: EmergencyStatus::Created,
            created_at: now,
            transitions: vec![(EmergencyStatus::Created, now)],
            selected_route: None,
            active_signal_ids: BTreeSet::new(),
            eta_seconds: None,
        };
        let mut lifecycle = Self {
            request,
            vehicle,
            route_signals: Vec::new(),
            ctx,
        };
        lifecycle.announce(None, EmergencyStatus::Created, now);
        lifecycle.enter(EmergencyStatus::HospitalAssigned, now);
        Ok(lifecycle)
    }

    pub fn id(&self) -> RequestId {
        self.request.id
    }

    pub fn status(&self) -> EmergencyStatus {
        self.request.status
    }

    pub fn request(&self) -> &EmergencyRequest {
        &self.request
    }

    pub fn vehicle(&self) -> &VehicleState {
        &self.vehicle
    }

    pub fn route_signals(&self) -> &[TrafficSignal] {
        &self.route_signals
    }

    /// Copy of the request with the signal set as the engine currently sees it
    /// (a background sweep may have expired grants since the last position update).
    pub fn snapshot(&self) -> EmergencyRequest {
        let mut request = self.request.clone();
        request.active_signal_ids = self.ctx.engine.lock().active_for(self.request.id);
        request
    }

    pub async fn start_journey(&mut self) -> Result<()> {
        self.guard(EmergencyStatus::HospitalAssigned, "start journey")?;
        let route = self
            .fetch_route(self.vehicle.coordinate, self.request.pickup)
            .await?;
        self.adopt_route(route);
        self.enter(EmergencyStatus::EnRouteToPickup, Utc::now());
        Ok(())
    }

    pub fn arrived_at_pickup(&mut self) -> Result<()> {
        self.guard(EmergencyStatus::EnRouteToPickup, "arrive at pickup")?;
        let now = Utc::now();
        self.release_corridor(now);
        self.enter(EmergencyStatus::AtPickup, now);
        Ok(())
    }

    pub async fn start_to_hospital(&mut self) -> Result<()> {
        self.guard(EmergencyStatus::AtPickup, "start to hospital")?;
        let route = self
            .fetch_route(self.vehicle.coordinate, self.request.hospital_coordinate)
            .await?;
        self.adopt_route(route);
        self.enter(EmergencyStatus::EnRouteToHospital, Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.guard(EmergencyStatus::EnRouteToHospital, "complete")?;
        let now = Utc::now();
        self.release_corridor(now);
        self.enter(EmergencyStatus::Completed, now);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if self.request.status.is_terminal() {
            return Err(self.reject("cancel"));
        }
        let now = Utc::now();
        self.release_corridor(now);
        self.enter(EmergencyStatus::Cancelled, now);
        Ok(())
    }

    /// Applies a newer position report. While en route the proximity engine is consulted
    /// and its commands are pushed out; the issued commands are returned.
    /// Reports older than the one already held are ignored.
    pub fn on_position(&mut self, vehicle: VehicleState) -> Vec<SignalCommand> {
        if vehicle.id != self.request.vehicle_id {
            log::warn!(
                "Request {} ignored a position report for vehicle {}",
                self.request.id,
                vehicle.id
            );
            return Vec::new();
        }
        if vehicle.last_update <= self.vehicle.last_update {
            log::debug!(
                "Request {} dropped an out-of-date position from {}",
                self.request.id,
                vehicle.last_update
            );
            return Vec::new();
        }
        self.vehicle = vehicle;

        if !self.request.status.is_en_route() {
            return Vec::new();
        }

        let commands = {
            let mut engine = self.ctx.engine.lock();
            let commands = engine.evaluate(
                self.request.id,
                &self.vehicle,
                &self.route_signals,
                Utc::now(),
            );
            self.request.active_signal_ids = engine.active_for(self.request.id);
            commands
        };
        self.ctx.dispatch_commands(commands.clone());

        let target = match self.request.status {
            EmergencyStatus::EnRouteToPickup => self.request.pickup,
            _ => self.request.hospital_coordinate,
        };
        // A stationary vehicle has no meaningful ETA.
        self.request.eta_seconds = eta_seconds(
            distance_meters(self.vehicle.coordinate, target),
            self.vehicle.speed_kmh,
        )
        .ok();

        commands
    }

    fn guard(&self, expected: EmergencyStatus, attempted: &'static str) -> Result<()> {
        if self.request.status == expected {
            Ok(())
        } else {
            Err(self.reject(attempted))
        }
    }

    fn reject(&self, attempted: &'static str) -> DispatchError {
        log::warn!(
            "Request {} rejected '{}' while {:?}",
            self.request.id,
            attempted,
            self.request.status
        );
        DispatchError::InvalidTransition {
            from: self.request.status,
            attempted,
        }
    }

    /// Asks the router, retrying up to the configured number of attempts.
    async fn fetch_route(&self, origin: Coordinate, destination: Coordinate) -> Result<Route> {
        let attempts = self.ctx.config.route_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.ctx.routing.get_route(origin, destination).await {
                Ok(route) => return Ok(route),
                Err(e) => {
                    log::warn!(
                        "Request {}: route attempt {}/{} failed: {}",
                        self.request.id,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = match e {
                        DispatchError::RouteUnavailable(reason) => reason,
                        other => other.to_string(),
                    };
                }
            }
        }
        Err(DispatchError::RouteUnavailable(last_error))
    }

    fn adopt_route(&mut self, route: Route) {
        self.route_signals = self
            .ctx
            .signal_directory
            .signals_near(&route.polyline, self.ctx.config.proximity.corridor_width_m);
        log::info!(
            "Request {}: route of {:.0} m with {} signal(s) on the corridor",
            self.request.id,
            route.distance_meters,
            self.route_signals.len()
        );
        self.request.selected_route = Some(route);
    }

    fn release_corridor(&mut self, now: DateTime<Utc>) {
        let commands = self.ctx.engine.lock().release_request(self.request.id, now);
        self.ctx.dispatch_commands(commands);
        self.request.active_signal_ids.clear();
        self.request.eta_seconds = None;
        self.route_signals.clear();
    }

    fn enter(&mut self, status: EmergencyStatus, at: DateTime<Utc>) {
        let from = self.request.status;
        self.request.status = status;
        self.request.transitions.push((status, at));
        self.announce(Some(from), status, at);
    }

    fn announce(&self, from: Option<EmergencyStatus>, to: EmergencyStatus, at: DateTime<Utc>) {
        log::info!(
            "Request {} (vehicle {}): {:?} -> {:?}",
            self.request.id,
            self.request.vehicle_id,
            from,
            to
        );
        self.ctx.events.emit(DispatchEvent::StatusChanged {
            request_id: self.request.id,
            vehicle_id: self.request.vehicle_id.clone(),
            from,
            to,
            hospital_id: self.request.assigned_hospital_id.clone(),
            at,
        });
    }
}

impl std::fmt::Debug for EmergencyLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("EmergencyLifecycle")
            .field("request", &self.request)
            .field("vehicle", &self.vehicle)
            .field("route_signals", &self.route_signals.len())
            .finish()
    }
}
