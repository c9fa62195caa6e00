use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::config::ProximityConfig;
use crate::geo::{bearing_degrees, distance_meters, heading_delta_degrees, travel_direction, Coordinate};
use crate::models::emergency::RequestId;
use crate::models::signal::{SignalAction, SignalActivation, SignalCommand, SignalId, TrafficSignal};
use crate::models::vehicle::VehicleState;

/// Inside this distance the vehicle is standing in the junction; bearing is meaningless
/// there, so the signal still counts as ahead.
const AT_SIGNAL_TOLERANCE_M: f64 = 10.0;

/// Decides which signals along an active route hold a priority grant.
///
/// The only state is the current activation set, keyed by signal. A signal belongs to at
/// most one request at a time; whoever was granted first keeps it until release or expiry.
#[derive(Debug)]
pub struct SignalProximityEngine {
    config: ProximityConfig,
    activations: BTreeMap<SignalId, SignalActivation>,
}

impl SignalProximityEngine {
    pub fn new(config: ProximityConfig) -> Self {
        Self {
            config,
            activations: BTreeMap::new(),
        }
    }

    /// Works out grant/extend/release commands for one position report of `request_id`'s vehicle.
    ///
    /// Lapsed grants of any request are expired first. Then each signal this request holds
    /// is released once the vehicle is beyond the release radius, has passed it, or it
    /// dropped off the route; otherwise it is extended once past half its window. Finally
    /// every free route signal inside the trigger radius and ahead of the vehicle is granted.
    /// Calling again with the same input yields nothing new.
    pub fn evaluate(
        &mut self,
        request_id: RequestId,
        vehicle: &VehicleState,
        route_signals: &[TrafficSignal],
        now: DateTime<Utc>,
    ) -> Vec<SignalCommand> {
        let mut commands = self.sweep_expired(now);
        let approach = travel_direction(vehicle.heading_degrees);
        let grant_duration = self.config.grant_duration();

        let held: Vec<SignalId> = self
            .activations
            .values()
            .filter(|activation| activation.request_id == request_id)
            .map(|activation| activation.signal_id.clone())
            .collect();

        for signal_id in held {
            let keep = route_signals
                .iter()
                .find(|signal| signal.id == signal_id)
                .map(|signal| {
                    let distance = distance_meters(vehicle.coordinate, signal.coordinate);
                    distance <= self.config.release_radius_m
                        && is_ahead(vehicle, signal.coordinate, distance)
                })
                .unwrap_or(false);

            if !keep {
                commands.extend(self.release(&signal_id, now));
                continue;
            }

            if let Some(activation) = self.activations.get_mut(&signal_id) {
                if now >= activation.expires_at - grant_duration / 2 {
                    activation.expires_at = now + grant_duration;
                    activation.approach = approach;
                    log::info!(
                        "[Corridor] Signal {} extended for request {} until {}",
                        signal_id,
                        request_id,
                        activation.expires_at
                    );
                    commands.push(SignalCommand {
                        signal_id: signal_id.clone(),
                        request_id,
                        action: SignalAction::Extend,
                        approach,
                        issued_at: now,
                        expires_at: Some(activation.expires_at),
                    });
                }
            }
        }

        for signal in route_signals {
            if let Some(holder) = self.activations.get(&signal.id) {
                if holder.request_id != request_id {
                    log::debug!(
                        "[Corridor] Signal {} already held by request {}; request {} waits",
                        signal.id,
                        holder.request_id,
                        request_id
                    );
                }
                continue;
            }

            let distance = distance_meters(vehicle.coordinate, signal.coordinate);
            if distance > self.config.trigger_radius_m || !is_ahead(vehicle, signal.coordinate, distance) {
                continue;
            }

            let activation = SignalActivation {
                signal_id: signal.id.clone(),
                request_id,
                granted_at: now,
                expires_at: now + grant_duration,
                approach,
            };
            log::info!(
                "[Corridor] Signal {} granted to request {} ({:?}, {:.0} m ahead)",
                signal.id,
                request_id,
                approach,
                distance
            );
            commands.push(SignalCommand {
                signal_id: signal.id.clone(),
                request_id,
                action: SignalAction::Grant,
                approach,
                issued_at: now,
                expires_at: Some(activation.expires_at),
            });
            self.activations.insert(signal.id.clone(), activation);
        }

        commands
    }

    /// Drops every grant whose window has closed, whichever request held it.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<SignalCommand> {
        let expired: Vec<SignalId> = self
            .activations
            .values()
            .filter(|activation| activation.expires_at <= now)
            .map(|activation| activation.signal_id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|signal_id| {
                log::info!("[Corridor] Grant on signal {} expired", signal_id);
                self.release(signal_id, now)
            })
            .collect()
    }

    /// Releases everything `request_id` holds. Used on pickup arrival and terminal transitions;
    /// a second call finds nothing and returns no commands.
    pub fn release_request(&mut self, request_id: RequestId, now: DateTime<Utc>) -> Vec<SignalCommand> {
        let held: Vec<SignalId> = self
            .activations
            .values()
            .filter(|activation| activation.request_id == request_id)
            .map(|activation| activation.signal_id.clone())
            .collect();

        held.iter()
            .filter_map(|signal_id| self.release(signal_id, now))
            .collect()
    }

    pub fn active_for(&self, request_id: RequestId) -> BTreeSet<SignalId> {
        self.activations
            .values()
            .filter(|activation| activation.request_id == request_id)
            .map(|activation| activation.signal_id.clone())
            .collect()
    }

    pub fn holder_of(&self, signal_id: &SignalId) -> Option<&SignalActivation> {
        self.activations.get(signal_id)
    }

    pub fn active_count(&self) -> usize {
        self.activations.len()
    }

    // Release of an ungranted signal is a no-op.
    fn release(&mut self, signal_id: &SignalId, now: DateTime<Utc>) -> Option<SignalCommand> {
        let activation = self.activations.remove(signal_id)?;
        log::info!(
            "[Corridor] Signal {} released by request {}",
            signal_id,
            activation.request_id
        );
        Some(SignalCommand {
            signal_id: activation.signal_id,
            request_id: activation.request_id,
            action: SignalAction::Release,
            approach: activation.approach,
            issued_at: now,
            expires_at: None,
        })
    }
}

/// A signal is ahead while the bearing to it stays within 90° of the heading.
/// Once the vehicle drives past, the bearing flips behind it.
fn is_ahead(vehicle: &VehicleState, signal: Coordinate, distance: f64) -> bool {
    if distance <= AT_SIGNAL_TOLERANCE_M {
        return true;
    }
    let bearing = bearing_degrees(vehicle.coordinate, signal);
    heading_delta_degrees(vehicle.heading_degrees, bearing).abs() < 90.0
}
