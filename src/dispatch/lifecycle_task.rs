use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::collaborators::CapacityProvider;
use crate::dispatch::registry::{LifecycleCommand, Registry, Transition};
use crate::error::Result;
use crate::lifecycle::EmergencyLifecycle;
use crate::models::vehicle::VehicleState;

async fn apply(lifecycle: &mut EmergencyLifecycle, transition: Transition) -> Result<()> {
    match transition {
        Transition::StartJourney => lifecycle.start_journey().await,
        Transition::ArrivedAtPickup => lifecycle.arrived_at_pickup(),
        Transition::StartToHospital => lifecycle.start_to_hospital().await,
        Transition::Complete => lifecycle.complete(),
        Transition::Cancel => lifecycle.cancel(),
    }
}

/// Sequential execution context of one emergency request.
///
/// Transitions and position updates are handled one at a time, so a cancel can never
/// interleave with a position update. Commands win over pending positions. The task
/// archives the request and exits once a terminal state is reached.
///
/// The hospital assignment is recorded here, before any command runs, so the terminal
/// release always follows a record and only happens if the record succeeded.
pub(crate) async fn run_lifecycle(
    mut lifecycle: EmergencyLifecycle,
    mut commands: mpsc::Receiver<LifecycleCommand>,
    mut positions: watch::Receiver<Option<VehicleState>>,
    registry: Arc<Mutex<Registry>>,
    capacity: Arc<dyn CapacityProvider>,
) {
    let hospital_id = lifecycle.request().assigned_hospital_id.clone();
    let recorded = match capacity.record_assignment(&hospital_id).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Could not record assignment at hospital {}: {}", hospital_id, e);
            false
        }
    };

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(LifecycleCommand::Snapshot(reply)) => {
                    let _ = reply.send(lifecycle.snapshot());
                }
                Some(LifecycleCommand::Transition(transition, reply)) => {
                    let result = apply(&mut lifecycle, transition)
                        .await
                        .map(|_| lifecycle.snapshot());

                    if lifecycle.status().is_terminal() {
                        registry.lock().archive(lifecycle.snapshot());
                        if recorded {
                            if let Err(e) = capacity.release_assignment(&hospital_id).await {
                                log::warn!("Could not release assignment at hospital {}: {}", hospital_id, e);
                            }
                        }
                        let _ = reply.send(result);
                        break;
                    }
                    let _ = reply.send(result);
                }
                None => break,
            },

            changed = positions.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = positions.borrow_and_update().clone();
                if let Some(vehicle) = latest {
                    lifecycle.on_position(vehicle);
                }
            }
        }
    }
    log::debug!("Lifecycle task for request {} stopped", lifecycle.id());
}
