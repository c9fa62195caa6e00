use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::dispatch::lifecycle_task::run_lifecycle;
use crate::dispatch::registry::{Binding, LifecycleCommand, LifecycleHandle, Registry, Transition};
use crate::error::{DispatchError, Result};
use crate::geo::Coordinate;
use crate::lifecycle::{DispatchContext, EmergencyLifecycle};
use crate::models::emergency::{EmergencyRequest, RequestId};
use crate::models::signal::SignalCommand;
use crate::models::vehicle::{TelemetryUpdate, VehicleId, VehicleState};

/// Process-wide entry point for dispatch.
///
/// Keeps the vehicle → request bindings and forwards work to one task per active request.
/// The registry lock only covers index reads and writes; hospital selection, routing and
/// the transitions themselves all run outside it.
#[derive(Clone)]
pub struct DispatchCoordinator {
    registry: Arc<Mutex<Registry>>,
    ctx: DispatchContext,
}

impl DispatchCoordinator {
    pub fn new(ctx: DispatchContext) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::new(ctx.config.archive_capacity))),
            ctx,
        }
    }

    /// Opens an emergency for `vehicle_id` with a pickup at `pickup`.
    ///
    /// Fails with `VehicleBusy` if the vehicle already has an active request (or another
    /// `create` for it is in flight); nothing is changed in that case.
    pub async fn create(&self, vehicle_id: VehicleId, pickup: Coordinate) -> Result<EmergencyRequest> {
        pickup.validate()?;

        let vehicle = {
            let mut registry = self.registry.lock();
            if registry.bindings.contains_key(&vehicle_id) {
                log::warn!("[Dispatch] Vehicle {} is busy; create rejected", vehicle_id);
                return Err(DispatchError::VehicleBusy(vehicle_id));
            }
            let vehicle = match registry.vehicles.get(&vehicle_id) {
                Some(vehicle) if vehicle.active => vehicle.clone(),
                Some(_) => {
                    return Err(DispatchError::InvalidInput(format!(
                        "vehicle {} is marked inactive",
                        vehicle_id
                    )))
                }
                None => {
                    return Err(DispatchError::InvalidInput(format!(
                        "vehicle {} has not reported a position",
                        vehicle_id
                    )))
                }
            };
            registry.bindings.insert(vehicle_id.clone(), Binding::Reserved);
            vehicle
        };
        let mut reservation = Reservation {
            registry: &self.registry,
            vehicle_id: vehicle_id.clone(),
            held: true,
        };

        let lifecycle = self.open_lifecycle(vehicle, pickup).await?;
        let request = lifecycle.snapshot();

        let (command_tx, command_rx) = mpsc::channel(self.ctx.config.command_buffer);
        let position_rx = {
            let mut registry = self.registry.lock();
            // Positions that arrived while the hospital was being chosen.
            let latest = registry
                .vehicles
                .get(&vehicle_id)
                .filter(|state| state.last_update > lifecycle.vehicle().last_update)
                .cloned();
            let (position_tx, position_rx) = watch::channel(None);
            if latest.is_some() {
                // Sent rather than seeded so the task sees it as a change.
                position_tx.send_replace(latest);
            }
            registry
                .bindings
                .insert(vehicle_id.clone(), Binding::Active(request.id));
            registry.requests.insert(
                request.id,
                LifecycleHandle {
                    commands: command_tx,
                    positions: position_tx,
                },
            );
            position_rx
        };
        reservation.held = false;

        tokio::spawn(run_lifecycle(
            lifecycle,
            command_rx,
            position_rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.ctx.capacity),
        ));

        log::info!(
            "[Dispatch] Request {} opened for vehicle {} -> hospital {}",
            request.id,
            vehicle_id,
            request.assigned_hospital_id
        );
        Ok(request)
    }

    async fn open_lifecycle(&self, vehicle: VehicleState, pickup: Coordinate) -> Result<EmergencyLifecycle> {
        let hospitals = self.ctx.capacity.snapshots().await?;
        EmergencyLifecycle::create(vehicle, pickup, &hospitals, self.ctx.clone())
    }

    /// Records a telemetry report and hands it to the bound request, if any.
    ///
    /// Reports are ordered by timestamp: one older than the stored position is dropped.
    /// Unbound vehicles are only tracked.
    pub fn location_update(&self, update: TelemetryUpdate) -> Result<()> {
        update.validate()?;

        let forward = {
            let mut registry = self.registry.lock();
            let state = match registry.vehicles.entry(update.vehicle_id.clone()) {
                Entry::Occupied(mut entry) => {
                    if !entry.get_mut().apply(&update) {
                        log::debug!(
                            "[Dispatch] Superseded position for vehicle {} at {} dropped",
                            update.vehicle_id,
                            update.timestamp
                        );
                        return Ok(());
                    }
                    entry.get().clone()
                }
                Entry::Vacant(entry) => entry.insert(VehicleState::from_update(&update)).clone(),
            };

            registry
                .active_request_for(&update.vehicle_id)
                .and_then(|request_id| registry.requests.get(&request_id))
                .map(|handle| (handle.positions.clone(), state))
        };

        if let Some((positions, state)) = forward {
            positions.send_if_modified(|current| {
                let newer = current
                    .as_ref()
                    .map_or(true, |held| held.last_update < state.last_update);
                if newer {
                    *current = Some(state);
                }
                newer
            });
        }
        Ok(())
    }

    pub async fn start_journey(&self, request_id: RequestId) -> Result<EmergencyRequest> {
        self.transition(request_id, Transition::StartJourney).await
    }

    pub async fn arrived_at_pickup(&self, request_id: RequestId) -> Result<EmergencyRequest> {
        self.transition(request_id, Transition::ArrivedAtPickup).await
    }

    pub async fn start_to_hospital(&self, request_id: RequestId) -> Result<EmergencyRequest> {
        self.transition(request_id, Transition::StartToHospital).await
    }

    pub async fn complete(&self, request_id: RequestId) -> Result<EmergencyRequest> {
        self.transition(request_id, Transition::Complete).await
    }

    pub async fn cancel(&self, request_id: RequestId) -> Result<EmergencyRequest> {
        self.transition(request_id, Transition::Cancel).await
    }

    /// Queues `transition` behind everything already sent to the request's task.
    pub async fn transition(&self, request_id: RequestId, transition: Transition) -> Result<EmergencyRequest> {
        let commands = self.command_sender(request_id, transition)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if commands
            .send(LifecycleCommand::Transition(transition, reply_tx))
            .await
            .is_err()
        {
            return Err(self.closed_error(request_id, transition));
        }
        match reply_rx.await {
            Ok(result) => result,
            // Task stopped with this command still queued: it reached a terminal state first.
            Err(_) => Err(self.closed_error(request_id, transition)),
        }
    }

    /// Current state of a request, active or archived.
    pub async fn lookup(&self, request_id: RequestId) -> Result<EmergencyRequest> {
        let commands = {
            let registry = self.registry.lock();
            if let Some(archived) = registry.archive.get(&request_id) {
                return Ok(archived.clone());
            }
            match registry.requests.get(&request_id) {
                Some(handle) => handle.commands.clone(),
                None => return Err(DispatchError::UnknownRequest(request_id)),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if commands.send(LifecycleCommand::Snapshot(reply_tx)).await.is_ok() {
            if let Ok(request) = reply_rx.await {
                return Ok(request);
            }
        }
        self.registry
            .lock()
            .archive
            .get(&request_id)
            .cloned()
            .ok_or(DispatchError::UnknownRequest(request_id))
    }

    pub fn active_request_for(&self, vehicle_id: &VehicleId) -> Option<RequestId> {
        self.registry.lock().active_request_for(vehicle_id)
    }

    pub fn vehicle_state(&self, vehicle_id: &VehicleId) -> Option<VehicleState> {
        self.registry.lock().vehicles.get(vehicle_id).cloned()
    }

    /// Vehicles whose telemetry has gone quiet. Only a flag for dashboards; requests are untouched.
    pub fn stale_vehicles(&self, now: DateTime<Utc>) -> Vec<VehicleId> {
        let stale_after = self.ctx.config.stale_after();
        let mut stale: Vec<VehicleId> = self
            .registry
            .lock()
            .vehicles
            .values()
            .filter(|vehicle| vehicle.active && vehicle.is_stale(now, stale_after))
            .map(|vehicle| vehicle.id.clone())
            .collect();
        stale.sort();
        stale
    }

    /// Marks a vehicle out of service. It keeps its record; new requests are refused until it reports again.
    pub fn deactivate_vehicle(&self, vehicle_id: &VehicleId) -> Result<()> {
        let mut registry = self.registry.lock();
        let vehicle = registry.vehicles.get_mut(vehicle_id).ok_or_else(|| {
            DispatchError::InvalidInput(format!("vehicle {} is not known", vehicle_id))
        })?;
        vehicle.active = false;
        log::info!("[Dispatch] Vehicle {} marked inactive", vehicle_id);
        Ok(())
    }

    /// Expires lapsed signal grants right now and pushes the releases out.
    pub fn sweep_signals(&self, now: DateTime<Utc>) -> Vec<SignalCommand> {
        let commands = self.ctx.engine.lock().sweep_expired(now);
        self.ctx.dispatch_commands(commands.clone());
        commands
    }

    /// Background sweep every quarter grant window, so a vehicle that stops reporting
    /// cannot hold a green corridor forever.
    pub fn spawn_signal_sweep(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let period = self.ctx.config.proximity.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let released = coordinator.sweep_signals(Utc::now());
                if !released.is_empty() {
                    log::info!("[Dispatch] Sweep released {} expired grant(s)", released.len());
                }
            }
        })
    }

    fn command_sender(
        &self,
        request_id: RequestId,
        transition: Transition,
    ) -> Result<mpsc::Sender<LifecycleCommand>> {
        let registry = self.registry.lock();
        match registry.requests.get(&request_id) {
            Some(handle) => Ok(handle.commands.clone()),
            None => Err(Self::closed_error_in(&registry, request_id, transition)),
        }
    }

    fn closed_error(&self, request_id: RequestId, transition: Transition) -> DispatchError {
        Self::closed_error_in(&self.registry.lock(), request_id, transition)
    }

    fn closed_error_in(registry: &Registry, request_id: RequestId, transition: Transition) -> DispatchError {
        match registry.archive.get(&request_id) {
            Some(archived) => {
                log::warn!(
                    "[Dispatch] Request {} is already {:?}; '{}' rejected",
                    request_id,
                    archived.status,
                    transition.name()
                );
                DispatchError::InvalidTransition {
                    from: archived.status,
                    attempted: transition.name(),
                }
            }
            None => DispatchError::UnknownRequest(request_id),
        }
    }
}

/// Frees a `Reserved` binding if `create` fails or its future is dropped before the
/// request is registered.
struct Reservation<'a> {
    registry: &'a Mutex<Registry>,
    vehicle_id: VehicleId,
    held: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let mut registry = self.registry.lock();
        if matches!(registry.bindings.get(&self.vehicle_id), Some(Binding::Reserved)) {
            registry.bindings.remove(&self.vehicle_id);
        }
    }
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("DispatchCoordinator")
            .field("vehicles", &registry.vehicles.len())
            .field("active_requests", &registry.requests.len())
            .field("archived_requests", &registry.archive.len())
            .finish()
    }
}
