mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use chrono::{Duration, Utc};
use common::{
    coord, harness, harness_with, hospital, signal, telemetry, wait_until, Harness, RecordingSignalControl,
    ScriptedRouter,
};
use green_corridor::collaborators::in_memory::{InMemoryCapacityBoard, InMemorySignalDirectory};
use green_corridor::collaborators::CapacityProvider;
use green_corridor::config::DispatchConfig;
use green_corridor::dispatch::DispatchCoordinator;
use green_corridor::error::{DispatchError, Result};
use green_corridor::lifecycle::DispatchContext;
use green_corridor::models::emergency::{EmergencyRequest, EmergencyStatus, RequestId};
use green_corridor::models::hospital::{HospitalCapacitySnapshot, HospitalId};
use green_corridor::models::signal::SignalAction;
use green_corridor::models::vehicle::VehicleId;

const LNG: f64 = 77.2000;

fn hospitals() -> Vec<HospitalCapacitySnapshot> {
    vec![hospital("H1", coord(28.6300, LNG), (1, 10), (1, 10))]
}

fn city() -> (DispatchCoordinator, Harness) {
    city_with(0)
}

fn city_with(route_failures: u32) -> (DispatchCoordinator, Harness) {
    let h = harness_with(
        DispatchConfig::default(),
        hospitals(),
        vec![
            signal("S-PICKUP", coord(28.6050, LNG)),
            signal("S-HOSPITAL", coord(28.6200, LNG)),
        ],
        route_failures,
    );
    (DispatchCoordinator::new(h.ctx.clone()), h)
}

fn report(coordinator: &DispatchCoordinator, vehicle: &str, lat: f64, seconds_ago: i64) {
    coordinator
        .location_update(telemetry(
            vehicle,
            coord(lat, LNG),
            0.0,
            Utc::now() - Duration::seconds(seconds_ago),
        ))
        .unwrap();
}

async fn open(coordinator: &DispatchCoordinator, vehicle: &str) -> RequestId {
    report(coordinator, vehicle, 28.6000, 5);
    coordinator
        .create(VehicleId::new(vehicle), coord(28.6100, LNG))
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn busy_vehicle_is_refused_until_its_request_closes() {
    let (coordinator, _h) = city();
    let first = open(&coordinator, "AMB-1").await;

    assert_eq!(
        coordinator
            .create(VehicleId::new("AMB-1"), coord(28.6100, LNG))
            .await
            .map(|r| r.id),
        Err(DispatchError::VehicleBusy(VehicleId::new("AMB-1")))
    );
    assert_eq!(coordinator.active_request_for(&VehicleId::new("AMB-1")), Some(first));

    coordinator.cancel(first).await.unwrap();
    assert_eq!(coordinator.active_request_for(&VehicleId::new("AMB-1")), None);

    let second = coordinator
        .create(VehicleId::new("AMB-1"), coord(28.6100, LNG))
        .await
        .unwrap();
    assert_ne!(second.id, first);
    assert_eq!(second.status, EmergencyStatus::HospitalAssigned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_for_one_vehicle_admit_exactly_one() {
    let (coordinator, _h) = city();
    report(&coordinator, "AMB-1", 28.6000, 5);

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .create(VehicleId::new("AMB-1"), coord(28.6100, LNG))
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    let mut busy = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(DispatchError::VehicleBusy(_)) => busy += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(busy, 7);
}

#[tokio::test]
async fn create_needs_a_known_active_vehicle() {
    let (coordinator, _h) = city();
    assert!(matches!(
        coordinator.create(VehicleId::new("GHOST"), coord(28.6100, LNG)).await,
        Err(DispatchError::InvalidInput(_))
    ));

    report(&coordinator, "AMB-1", 28.6000, 5);
    coordinator.deactivate_vehicle(&VehicleId::new("AMB-1")).unwrap();
    assert!(matches!(
        coordinator.create(VehicleId::new("AMB-1"), coord(28.6100, LNG)).await,
        Err(DispatchError::InvalidInput(_))
    ));
    assert_eq!(coordinator.active_request_for(&VehicleId::new("AMB-1")), None);
}

#[tokio::test]
async fn bad_pickup_is_invalid_input() {
    let (coordinator, _h) = city();
    report(&coordinator, "AMB-1", 28.6000, 5);
    let nowhere = green_corridor::geo::Coordinate {
        latitude: 95.0,
        longitude: LNG,
    };
    assert!(matches!(
        coordinator.create(VehicleId::new("AMB-1"), nowhere).await,
        Err(DispatchError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn failed_create_leaves_the_vehicle_free() {
    let h = harness(Vec::new(), Vec::new());
    let coordinator = DispatchCoordinator::new(h.ctx.clone());
    report(&coordinator, "AMB-1", 28.6000, 5);

    assert_eq!(
        coordinator
            .create(VehicleId::new("AMB-1"), coord(28.6100, LNG))
            .await
            .map(|r| r.id),
        Err(DispatchError::NoAvailableHospital)
    );

    h.board.upsert(hospital("H1", coord(28.6300, LNG), (1, 10), (1, 10)));
    assert!(coordinator
        .create(VehicleId::new("AMB-1"), coord(28.6100, LNG))
        .await
        .is_ok());
}

#[tokio::test]
async fn unknown_request_is_reported() {
    let (coordinator, _h) = city();
    let stranger = RequestId::generate();
    assert_eq!(
        coordinator.start_journey(stranger).await.map(|r| r.id),
        Err(DispatchError::UnknownRequest(stranger))
    );
    assert_eq!(
        coordinator.lookup(stranger).await.map(|r| r.id),
        Err(DispatchError::UnknownRequest(stranger))
    );
}

#[tokio::test]
async fn closed_requests_refuse_further_transitions() {
    let (coordinator, _h) = city();
    let id = open(&coordinator, "AMB-1").await;
    coordinator.cancel(id).await.unwrap();

    assert_eq!(
        coordinator.complete(id).await.map(|r| r.id),
        Err(DispatchError::InvalidTransition {
            from: EmergencyStatus::Cancelled,
            attempted: "complete",
        })
    );
    assert_eq!(coordinator.lookup(id).await.unwrap().status, EmergencyStatus::Cancelled);
}

#[tokio::test]
async fn transitions_out_of_order_are_refused() {
    let (coordinator, _h) = city();
    let id = open(&coordinator, "AMB-1").await;

    assert!(matches!(
        coordinator.complete(id).await,
        Err(DispatchError::InvalidTransition { from: EmergencyStatus::HospitalAssigned, .. })
    ));
    assert_eq!(coordinator.lookup(id).await.unwrap().status, EmergencyStatus::HospitalAssigned);
}

#[tokio::test]
async fn routing_outage_keeps_the_request_open() {
    let (coordinator, h) = city_with(2);
    let id = open(&coordinator, "AMB-1").await;

    assert!(matches!(
        coordinator.start_journey(id).await,
        Err(DispatchError::RouteUnavailable(_))
    ));
    assert_eq!(h.router.call_count(), 2);
    assert_eq!(coordinator.lookup(id).await.unwrap().status, EmergencyStatus::HospitalAssigned);
    assert_eq!(coordinator.cancel(id).await.unwrap().status, EmergencyStatus::Cancelled);
}

#[tokio::test]
async fn telemetry_reaches_the_corridor() {
    let (coordinator, h) = city();
    let id = open(&coordinator, "AMB-1").await;
    coordinator.start_journey(id).await.unwrap();

    report(&coordinator, "AMB-1", 28.6030, 0);
    let granted = wait_until(|| {
        let coordinator = coordinator.clone();
        async move {
            coordinator
                .lookup(id)
                .await
                .map(|r| !r.active_signal_ids.is_empty())
                .unwrap_or(false)
        }
    })
    .await;
    assert!(granted, "signal never granted");
    assert_eq!(
        h.signals.actions(),
        vec![("S-PICKUP".to_string(), SignalAction::Grant)]
    );

    let closed = coordinator.cancel(id).await.unwrap();
    assert!(closed.active_signal_ids.is_empty());
    assert_eq!(h.ctx.engine.lock().active_count(), 0);
}

#[tokio::test]
async fn older_telemetry_is_dropped() {
    let (coordinator, _h) = city();
    report(&coordinator, "AMB-1", 28.6010, 1);
    report(&coordinator, "AMB-1", 28.6020, 20);

    let state = coordinator.vehicle_state(&VehicleId::new("AMB-1")).unwrap();
    assert_eq!(state.coordinate, coord(28.6010, LNG));
}

#[tokio::test]
async fn invalid_telemetry_is_rejected() {
    let (coordinator, _h) = city();
    let mut update = telemetry("AMB-1", coord(28.6, LNG), 0.0, Utc::now());
    update.speed_kmh = -5.0;
    assert!(matches!(
        coordinator.location_update(update),
        Err(DispatchError::InvalidInput(_))
    ));
    assert!(coordinator.vehicle_state(&VehicleId::new("AMB-1")).is_none());
}

#[tokio::test]
async fn quiet_vehicles_are_flagged_stale() {
    let (coordinator, _h) = city();
    report(&coordinator, "AMB-2", 28.6000, 120);
    report(&coordinator, "AMB-1", 28.6000, 60);
    report(&coordinator, "AMB-3", 28.6000, 1);
    report(&coordinator, "AMB-4", 28.6000, 300);
    coordinator.deactivate_vehicle(&VehicleId::new("AMB-4")).unwrap();

    assert_eq!(
        coordinator.stale_vehicles(Utc::now()),
        vec![VehicleId::new("AMB-1"), VehicleId::new("AMB-2")]
    );
}

#[tokio::test]
async fn hospital_load_tracks_open_requests() {
    let (coordinator, h) = city();
    let h1 = HospitalId::new("H1");
    let first = open(&coordinator, "AMB-1").await;
    let second = open(&coordinator, "AMB-2").await;
    // Each request task records its own assignment as it starts.
    assert!(wait_until(|| {
        let board = Arc::clone(&h.board);
        let h1 = h1.clone();
        async move { board.get(&h1).map(|s| s.incoming_assigned_count) == Some(2) }
    })
    .await);

    coordinator.cancel(first).await.unwrap();
    assert_eq!(h.board.get(&h1).unwrap().incoming_assigned_count, 1);
    coordinator.cancel(second).await.unwrap();
    assert_eq!(h.board.get(&h1).unwrap().incoming_assigned_count, 0);
}

#[tokio::test]
async fn sweep_releases_grants_of_silent_vehicles() {
    let mut config = DispatchConfig::default();
    config.proximity.grant_duration_secs = 60;
    let h = harness_with(
        config,
        hospitals(),
        vec![signal("S-PICKUP", coord(28.6050, LNG))],
        0,
    );
    let coordinator = DispatchCoordinator::new(h.ctx.clone());
    let id = open(&coordinator, "AMB-1").await;
    coordinator.start_journey(id).await.unwrap();
    report(&coordinator, "AMB-1", 28.6030, 0);
    let signals = Arc::clone(&h.signals);
    assert!(wait_until(|| {
        let signals = Arc::clone(&signals);
        async move { !signals.actions().is_empty() }
    })
    .await);

    assert!(coordinator.sweep_signals(Utc::now()).is_empty());
    let released = coordinator.sweep_signals(Utc::now() + Duration::seconds(61));
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].action, SignalAction::Release);
    assert!(coordinator.lookup(id).await.unwrap().active_signal_ids.is_empty());
}

#[tokio::test]
async fn full_emergency_end_to_end() {
    let h = harness(
        vec![
            hospital("H1", coord(28.6200, 77.2100), (9, 10), (0, 10)),
            hospital("H2", coord(28.6300, 77.2100), (1, 10), (0, 10)),
        ],
        vec![signal("S-1", coord(28.6050, 77.2050))],
    );
    let coordinator = DispatchCoordinator::new(h.ctx.clone());
    let vehicle = VehicleId::new("V");
    coordinator
        .location_update(telemetry("V", coord(28.6000, 77.2000), 45.0, Utc::now() - Duration::seconds(5)))
        .unwrap();

    let request = coordinator.create(vehicle.clone(), coord(28.6100, 77.2100)).await.unwrap();
    assert_eq!(request.assigned_hospital_id, HospitalId::new("H2"));

    let id = request.id;
    assert_eq!(coordinator.start_journey(id).await.unwrap().status, EmergencyStatus::EnRouteToPickup);
    assert_eq!(coordinator.arrived_at_pickup(id).await.unwrap().status, EmergencyStatus::AtPickup);
    assert_eq!(coordinator.start_to_hospital(id).await.unwrap().status, EmergencyStatus::EnRouteToHospital);
    let closed = coordinator.complete(id).await.unwrap();
    assert_eq!(closed.status, EmergencyStatus::Completed);
    assert!(closed.active_signal_ids.is_empty());
    assert_eq!(closed.transitions.len(), 6);

    assert_eq!(coordinator.active_request_for(&vehicle), None);
    // The archive keeps the request but not its route geometry.
    let archived = coordinator.lookup(id).await.unwrap();
    assert!(archived.selected_route.is_none());
    assert_eq!(archived, EmergencyRequest { selected_route: None, ..closed });
    assert_eq!(
        h.observer.statuses().last(),
        Some(&EmergencyStatus::Completed)
    );
}

#[tokio::test]
async fn archive_forgets_the_oldest_closed_requests() {
    let mut config = DispatchConfig::default();
    config.archive_capacity = 2;
    let h = harness_with(config, hospitals(), Vec::new(), 0);
    let coordinator = DispatchCoordinator::new(h.ctx.clone());

    let mut closed = Vec::new();
    for _ in 0..3 {
        let id = open(&coordinator, "AMB-1").await;
        coordinator.start_journey(id).await.unwrap();
        coordinator.cancel(id).await.unwrap();
        closed.push(id);
    }

    assert_eq!(
        coordinator.lookup(closed[0]).await.map(|r| r.id),
        Err(DispatchError::UnknownRequest(closed[0]))
    );
    for id in &closed[1..] {
        let archived = coordinator.lookup(*id).await.unwrap();
        assert_eq!(archived.status, EmergencyStatus::Cancelled);
        assert!(archived.selected_route.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn background_sweep_releases_lapsed_grants() {
    let mut config = DispatchConfig::default();
    config.proximity.grant_duration_secs = 1;
    let period = config.proximity.sweep_interval();
    let h = harness_with(
        config,
        hospitals(),
        vec![signal("S-PICKUP", coord(28.6050, LNG))],
        0,
    );
    let coordinator = DispatchCoordinator::new(h.ctx.clone());
    let id = open(&coordinator, "AMB-1").await;
    coordinator.start_journey(id).await.unwrap();
    report(&coordinator, "AMB-1", 28.6030, 0);
    let signals = Arc::clone(&h.signals);
    assert!(wait_until(|| {
        let signals = Arc::clone(&signals);
        async move { !signals.actions().is_empty() }
    })
    .await);

    // Grant windows run on the wall clock; the sweep ticker runs on tokio's paused clock.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let sweep = coordinator.spawn_signal_sweep();
    tokio::time::sleep(period + std::time::Duration::from_millis(100)).await;

    assert_eq!(
        h.signals.actions(),
        vec![
            ("S-PICKUP".to_string(), SignalAction::Grant),
            ("S-PICKUP".to_string(), SignalAction::Release),
        ]
    );
    assert_eq!(h.ctx.engine.lock().active_count(), 0);
    assert!(coordinator.lookup(id).await.unwrap().active_signal_ids.is_empty());
    sweep.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_during_a_telemetry_burst_leaves_no_grant_behind() {
    let (coordinator, h) = city();
    let id = open(&coordinator, "AMB-1").await;
    coordinator.start_journey(id).await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let burst = {
        let coordinator = coordinator.clone();
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            let base = Utc::now() - Duration::seconds(4);
            let mut step = 0i64;
            while !stop.load(Ordering::Relaxed) && step < 3_000 {
                let lat = 28.6025 + (step % 20) as f64 * 0.0001;
                coordinator
                    .location_update(telemetry(
                        "AMB-1",
                        coord(lat, LNG),
                        0.0,
                        base + Duration::milliseconds(step),
                    ))
                    .unwrap();
                step += 1;
                tokio::task::yield_now().await;
            }
        })
    };

    let signals = Arc::clone(&h.signals);
    assert!(wait_until(|| {
        let signals = Arc::clone(&signals);
        async move { !signals.actions().is_empty() }
    })
    .await);

    let closed = coordinator.cancel(id).await.unwrap();
    stop.store(true, Ordering::Relaxed);
    burst.await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(closed.status, EmergencyStatus::Cancelled);
    assert!(closed.active_signal_ids.is_empty());
    assert_eq!(h.ctx.engine.lock().active_count(), 0);

    let actions = h.signals.actions();
    let last_release = actions
        .iter()
        .rposition(|(_, action)| *action == SignalAction::Release)
        .expect("cancel releases the held signal");
    assert!(actions[last_release + 1..]
        .iter()
        .all(|(_, action)| *action != SignalAction::Grant));
    assert_eq!(coordinator.lookup(id).await.unwrap().status, EmergencyStatus::Cancelled);
}

/// Capacity feed whose bookkeeping calls fail, counting the releases it is asked for.
struct FlakyCapacity {
    board: InMemoryCapacityBoard,
    release_calls: AtomicU32,
}

#[async_trait]
impl CapacityProvider for FlakyCapacity {
    async fn snapshots(&self) -> Result<Vec<HospitalCapacitySnapshot>> {
        self.board.snapshots().await
    }

    async fn record_assignment(&self, _hospital_id: &HospitalId) -> Result<()> {
        Err(DispatchError::InvalidInput("capacity service unavailable".to_string()))
    }

    async fn release_assignment(&self, hospital_id: &HospitalId) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.board.release_assignment(hospital_id).await
    }
}

#[tokio::test]
async fn unrecorded_assignment_is_never_released() {
    let capacity = Arc::new(FlakyCapacity {
        board: InMemoryCapacityBoard::new(hospitals()),
        release_calls: AtomicU32::new(0),
    });
    let ctx = DispatchContext::new(
        DispatchConfig::default(),
        Arc::new(ScriptedRouter::failing(0)),
        capacity.clone(),
        Arc::new(InMemorySignalDirectory::new(Vec::new())),
        Arc::new(RecordingSignalControl::default()),
    );
    let coordinator = DispatchCoordinator::new(ctx);

    let id = open(&coordinator, "AMB-1").await;
    assert_eq!(coordinator.cancel(id).await.unwrap().status, EmergencyStatus::Cancelled);
    assert_eq!(capacity.release_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        capacity.board.get(&HospitalId::new("H1")).unwrap().incoming_assigned_count,
        0
    );
}
