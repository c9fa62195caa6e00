#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use green_corridor::collaborators::{
    InMemoryCapacityBoard, InMemorySignalDirectory, RoutingService, SignalControl, StraightLineRouter,
};
use green_corridor::config::DispatchConfig;
use green_corridor::error::{DispatchError, Result};
use green_corridor::geo::Coordinate;
use green_corridor::lifecycle::DispatchContext;
use green_corridor::models::emergency::Route;
use green_corridor::models::hospital::{HospitalCapacitySnapshot, HospitalId};
use green_corridor::models::signal::{SignalAction, SignalCommand, SignalId, TrafficSignal};
use green_corridor::models::vehicle::{TelemetryUpdate, VehicleId, VehicleState};
use green_corridor::notification::EmergencyObserver;
use green_corridor::shared_data::DispatchEvent;

pub fn coord(latitude: f64, longitude: f64) -> Coordinate {
    Coordinate::new(latitude, longitude).unwrap()
}

pub fn hospital(id: &str, at: Coordinate, icu: (u32, u32), er: (u32, u32)) -> HospitalCapacitySnapshot {
    HospitalCapacitySnapshot {
        hospital_id: HospitalId::new(id),
        coordinate: at,
        total_beds: 100,
        occupied_beds: 50,
        icu_beds: icu.1,
        occupied_icu_beds: icu.0,
        emergency_beds: er.1,
        occupied_emergency_beds: er.0,
        accepting_patients: true,
        incoming_assigned_count: 0,
    }
}

pub fn signal(id: &str, at: Coordinate) -> TrafficSignal {
    TrafficSignal {
        id: SignalId::new(id),
        coordinate: at,
    }
}

pub fn vehicle(id: &str, at: Coordinate, heading: f64, last_update: DateTime<Utc>) -> VehicleState {
    VehicleState {
        id: VehicleId::new(id),
        coordinate: at,
        heading_degrees: heading,
        speed_kmh: 50.0,
        last_update,
        active: true,
    }
}

pub fn telemetry(id: &str, at: Coordinate, heading: f64, timestamp: DateTime<Utc>) -> TelemetryUpdate {
    TelemetryUpdate {
        vehicle_id: VehicleId::new(id),
        coordinate: at,
        heading_degrees: heading,
        speed_kmh: 50.0,
        timestamp,
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingObserver {
    pub fn statuses(&self) -> Vec<green_corridor::models::emergency::EmergencyStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DispatchEvent::StatusChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }
}

impl EmergencyObserver for RecordingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Default)]
pub struct RecordingSignalControl {
    pub commands: Mutex<Vec<SignalCommand>>,
}

impl RecordingSignalControl {
    pub fn actions(&self) -> Vec<(String, SignalAction)> {
        self.commands
            .lock()
            .iter()
            .map(|c| (c.signal_id.0.clone(), c.action))
            .collect()
    }
}

impl SignalControl for RecordingSignalControl {
    fn send(&self, command: &SignalCommand) {
        self.commands.lock().push(command.clone());
    }
}

/// Straight-line router that fails the first `failures` calls.
pub struct ScriptedRouter {
    failures: AtomicU32,
    pub calls: AtomicU32,
    inner: StraightLineRouter,
}

impl ScriptedRouter {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            inner: StraightLineRouter::default(),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoutingService for ScriptedRouter {
    async fn get_route(&self, origin: Coordinate, destination: Coordinate) -> Result<Route> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DispatchError::RouteUnavailable("router offline".to_string()));
        }
        self.inner.get_route(origin, destination).await
    }
}

pub struct Harness {
    pub ctx: DispatchContext,
    pub board: Arc<InMemoryCapacityBoard>,
    pub router: Arc<ScriptedRouter>,
    pub signals: Arc<RecordingSignalControl>,
    pub observer: Arc<RecordingObserver>,
}

pub fn harness(hospitals: Vec<HospitalCapacitySnapshot>, signals: Vec<TrafficSignal>) -> Harness {
    harness_with(DispatchConfig::default(), hospitals, signals, 0)
}

pub fn harness_with(
    config: DispatchConfig,
    hospitals: Vec<HospitalCapacitySnapshot>,
    signals: Vec<TrafficSignal>,
    route_failures: u32,
) -> Harness {
    let board = Arc::new(InMemoryCapacityBoard::new(hospitals));
    let router = Arc::new(ScriptedRouter::failing(route_failures));
    let control = Arc::new(RecordingSignalControl::default());
    let observer = Arc::new(RecordingObserver::default());
    let ctx = DispatchContext::new(
        config,
        router.clone(),
        board.clone(),
        Arc::new(InMemorySignalDirectory::new(signals)),
        control.clone(),
    );
    ctx.events.subscribe(observer.clone());
    Harness {
        ctx,
        board,
        router,
        signals: control,
        observer,
    }
}

/// Polls `check` until it holds or roughly a second has passed.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
