// dispatch_simulation_main.rs
//
// Drives one ambulance through a full emergency against in-memory collaborators:
// dispatch, drive to pickup, drive to hospital, close. Signal commands go to the log,
// or to RabbitMQ when GREEN_CORRIDOR_AMQP is set.

use chrono::Utc;
use green_corridor::collaborators::{
    InMemoryCapacityBoard, InMemorySignalDirectory, LoggingSignalControl, SignalControl, StraightLineRouter,
};
use green_corridor::config::DispatchConfig;
use green_corridor::dispatch::DispatchCoordinator;
use green_corridor::geo::{bearing_degrees, Coordinate};
use green_corridor::global_variables::{AMQP_ENABLE_ENV_VAR, AMQP_URL, DISPATCH_AUDIT_CSV};
use green_corridor::lifecycle::DispatchContext;
use green_corridor::models::emergency::{EmergencyRequest, Route};
use green_corridor::models::hospital::{HospitalCapacitySnapshot, HospitalId};
use green_corridor::models::signal::{SignalId, TrafficSignal};
use green_corridor::models::vehicle::{TelemetryUpdate, VehicleId};
use green_corridor::notification::amqp_publisher::AmqpPublisher;
use green_corridor::notification::audit_log::CsvAuditLog;
use green_corridor::notification::LogObserver;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn hospital(id: &str, lat: f64, lng: f64, icu: (u32, u32), er: (u32, u32)) -> HospitalCapacitySnapshot {
    HospitalCapacitySnapshot {
        hospital_id: HospitalId::new(id),
        coordinate: Coordinate { latitude: lat, longitude: lng },
        total_beds: 200,
        occupied_beds: 120,
        icu_beds: icu.1,
        occupied_icu_beds: icu.0,
        emergency_beds: er.1,
        occupied_emergency_beds: er.0,
        accepting_patients: true,
        incoming_assigned_count: 0,
    }
}

/// Scatters signals close to the straight line between `from` and `to`.
fn scatter_signals(rng: &mut StdRng, prefix: &str, from: Coordinate, to: Coordinate, count: usize) -> Vec<TrafficSignal> {
    (1..=count)
        .map(|i| {
            let t = i as f64 / (count + 1) as f64;
            TrafficSignal {
                id: SignalId::new(format!("{}-{:02}", prefix, i)),
                coordinate: Coordinate {
                    latitude: from.latitude + (to.latitude - from.latitude) * t + rng.random_range(-0.0003..0.0003),
                    longitude: from.longitude + (to.longitude - from.longitude) * t + rng.random_range(-0.0003..0.0003),
                },
            }
        })
        .collect()
}

/// Replays the route as telemetry, one report per polyline vertex.
async fn drive(
    coordinator: &DispatchCoordinator,
    vehicle_id: &VehicleId,
    route: &Route,
    rng: &mut StdRng,
) -> Result<(), Box<dyn Error>> {
    for pair in route.polyline.windows(2) {
        coordinator.location_update(TelemetryUpdate {
            vehicle_id: vehicle_id.clone(),
            coordinate: pair[1],
            heading_degrees: bearing_degrees(pair[0], pair[1]),
            speed_kmh: rng.random_range(40.0..80.0),
            timestamp: Utc::now(),
        })?;
        sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

fn print_request(request: &EmergencyRequest) {
    println!(
        "Request {} | vehicle {} | hospital {} (score {:.1}) | {:?} | signals held: {:?}",
        request.id,
        request.vehicle_id,
        request.assigned_hospital_id,
        request.hospital_score,
        request.status,
        request.active_signal_ids
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = DispatchConfig::load()?;
    let mut rng = StdRng::seed_from_u64(7);

    let depot = Coordinate::new(28.6000, 77.2000)?;
    let pickup = Coordinate::new(28.6100, 77.2100)?;
    let hospitals = vec![
        hospital("AIIMS-TRAUMA", 28.5672, 77.2100, (18, 20), (25, 40)),
        hospital("RML", 28.6264, 77.2005, (4, 12), (10, 30)),
        hospital("SAFDARJUNG", 28.5685, 77.2066, (9, 30), (20, 50)),
    ];
    let mut signals = scatter_signals(&mut rng, "DEPOT-PICKUP", depot, pickup, 4);
    for h in &hospitals {
        signals.extend(scatter_signals(&mut rng, &h.hospital_id.0, pickup, h.coordinate, 5));
    }

    let (signal_control, amqp) = if std::env::var(AMQP_ENABLE_ENV_VAR).is_ok() {
        let publisher = Arc::new(AmqpPublisher::connect(AMQP_URL)?);
        (publisher.clone() as Arc<dyn SignalControl>, Some(publisher))
    } else {
        (Arc::new(LoggingSignalControl) as Arc<dyn SignalControl>, None)
    };

    let ctx = DispatchContext::new(
        config,
        Arc::new(StraightLineRouter::default()),
        Arc::new(InMemoryCapacityBoard::new(hospitals)),
        Arc::new(InMemorySignalDirectory::new(signals)),
        signal_control,
    );
    ctx.events.subscribe(Arc::new(LogObserver));
    ctx.events.subscribe(Arc::new(CsvAuditLog::new(DISPATCH_AUDIT_CSV)));
    if let Some(publisher) = amqp {
        ctx.events.subscribe(publisher);
    }

    let coordinator = DispatchCoordinator::new(ctx);
    let _sweep = coordinator.spawn_signal_sweep();

    let vehicle_id = VehicleId::new("AMB-01");
    coordinator.location_update(TelemetryUpdate {
        vehicle_id: vehicle_id.clone(),
        coordinate: depot,
        heading_degrees: 45.0,
        speed_kmh: 0.0,
        timestamp: Utc::now(),
    })?;

    let request = coordinator.create(vehicle_id.clone(), pickup).await?;
    print_request(&request);

    let request = coordinator.start_journey(request.id).await?;
    if let Some(route) = &request.selected_route {
        drive(&coordinator, &vehicle_id, route, &mut rng).await?;
    }
    print_request(&coordinator.lookup(request.id).await?);

    coordinator.arrived_at_pickup(request.id).await?;
    let request = coordinator.start_to_hospital(request.id).await?;
    if let Some(route) = &request.selected_route {
        drive(&coordinator, &vehicle_id, route, &mut rng).await?;
    }
    print_request(&coordinator.lookup(request.id).await?);

    let closed = coordinator.complete(request.id).await?;
    print_request(&closed);
    println!("Audit trail written to {}", DISPATCH_AUDIT_CSV);
    Ok(())
}
