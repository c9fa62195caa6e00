use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collaborators::{CapacityProvider, RoutingService, SignalControl, SignalDirectory};
use crate::error::{DispatchError, Result};
use crate::geo::{distance_meters, distance_to_segment_meters, Coordinate};
use crate::models::emergency::Route;
use crate::models::hospital::{HospitalCapacitySnapshot, HospitalId};
use crate::models::signal::{SignalCommand, TrafficSignal};

/// Capacity board held in process. Backs the simulation binary and the tests.
#[derive(Debug, Default)]
pub struct InMemoryCapacityBoard {
    hospitals: Mutex<BTreeMap<HospitalId, HospitalCapacitySnapshot>>,
}

impl InMemoryCapacityBoard {
    pub fn new(hospitals: Vec<HospitalCapacitySnapshot>) -> Self {
        let board = Self::default();
        for hospital in hospitals {
            board.upsert(hospital);
        }
        board
    }

    pub fn upsert(&self, hospital: HospitalCapacitySnapshot) {
        self.hospitals
            .lock()
            .insert(hospital.hospital_id.clone(), hospital);
    }

    pub fn get(&self, hospital_id: &HospitalId) -> Option<HospitalCapacitySnapshot> {
        self.hospitals.lock().get(hospital_id).cloned()
    }

    fn adjust_incoming(&self, hospital_id: &HospitalId, delta: i64) -> Result<()> {
        let mut hospitals = self.hospitals.lock();
        let hospital = hospitals.get_mut(hospital_id).ok_or_else(|| {
            DispatchError::InvalidInput(format!("hospital {} is not on the board", hospital_id))
        })?;
        let updated = (hospital.incoming_assigned_count as i64 + delta).max(0);
        hospital.incoming_assigned_count = updated as u32;
        Ok(())
    }
}

#[async_trait]
impl CapacityProvider for InMemoryCapacityBoard {
    async fn snapshots(&self) -> Result<Vec<HospitalCapacitySnapshot>> {
        Ok(self.hospitals.lock().values().cloned().collect())
    }

    async fn record_assignment(&self, hospital_id: &HospitalId) -> Result<()> {
        self.adjust_incoming(hospital_id, 1)
    }

    async fn release_assignment(&self, hospital_id: &HospitalId) -> Result<()> {
        self.adjust_incoming(hospital_id, -1)
    }
}

/// Signal inventory held in process.
#[derive(Debug, Default)]
pub struct InMemorySignalDirectory {
    signals: Vec<TrafficSignal>,
}

impl InMemorySignalDirectory {
    pub fn new(signals: Vec<TrafficSignal>) -> Self {
        Self { signals }
    }
}

impl SignalDirectory for InMemorySignalDirectory {
    fn signals_near(&self, polyline: &[Coordinate], corridor_width_m: f64) -> Vec<TrafficSignal> {
        let mut on_route: Vec<(usize, f64, TrafficSignal)> = Vec::new();
        for signal in &self.signals {
            // (segment index, offset from route, distance from segment start)
            let closest = match polyline {
                [] => None,
                [only] => Some((0, distance_meters(signal.coordinate, *only), 0.0)),
                _ => polyline
                    .windows(2)
                    .enumerate()
                    .map(|(i, pair)| {
                        (
                            i,
                            distance_to_segment_meters(signal.coordinate, pair[0], pair[1]),
                            distance_meters(pair[0], signal.coordinate),
                        )
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1)),
            };
            if let Some((segment, offset, along)) = closest {
                if offset <= corridor_width_m {
                    on_route.push((segment, along, signal.clone()));
                }
            }
        }
        on_route.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        on_route.into_iter().map(|(_, _, signal)| signal).collect()
    }
}

/// Straight-line "routing" for the simulation binary: evenly spaced points between
/// origin and destination. Real deployments plug a map router in instead.
#[derive(Debug, Clone)]
pub struct StraightLineRouter {
    pub step_m: f64,
}

impl Default for StraightLineRouter {
    fn default() -> Self {
        Self { step_m: 100.0 }
    }
}

#[async_trait]
impl RoutingService for StraightLineRouter {
    async fn get_route(&self, origin: Coordinate, destination: Coordinate) -> Result<Route> {
        origin
            .validate()
            .and_then(|_| destination.validate())
            .map_err(|e| DispatchError::RouteUnavailable(e.to_string()))?;

        let distance = distance_meters(origin, destination);
        let steps = (distance / self.step_m.max(1.0)).ceil().max(1.0) as usize;
        let polyline = (0..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                Coordinate {
                    latitude: origin.latitude + (destination.latitude - origin.latitude) * t,
                    longitude: origin.longitude + (destination.longitude - origin.longitude) * t,
                }
            })
            .collect();
        Ok(Route {
            polyline,
            distance_meters: distance,
        })
    }
}

/// Signal control that only writes the commands to the log.
#[derive(Debug, Default)]
pub struct LoggingSignalControl;

impl SignalControl for LoggingSignalControl {
    fn send(&self, command: &SignalCommand) {
        log::info!(
            "[SignalControl] {:?} signal {} for request {} ({:?})",
            command.action,
            command.signal_id,
            command.request_id,
            command.approach
        );
    }
}
