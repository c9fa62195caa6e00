// hospital_selector/mod.rs
//
// Ranks candidate hospitals for a pickup location. Stateless: capacity snapshots come in,
// a ranking comes out, and nothing is mutated. Committing the assignment (bumping the
// hospital's incoming count) is the caller's job.

use crate::config::SelectorWeights;
use crate::error::{DispatchError, Result};
use crate::geo::{distance_meters, Coordinate};
use crate::models::hospital::{HospitalCapacitySnapshot, HospitalId};

#[derive(Debug, Clone, PartialEq)]
pub struct HospitalSelection {
    pub hospital_id: HospitalId,
    pub coordinate: Coordinate,
    pub score: f64,
    pub distance_meters: f64,
}

/// Composite score for a hospital `distance_m` away from the pickup. Lower is better.
pub fn hospital_score(
    weights: &SelectorWeights,
    distance_m: f64,
    hospital: &HospitalCapacitySnapshot,
) -> f64 {
    weights.distance * distance_m
        + weights.icu_load * hospital.icu_load()
        + weights.emergency_load * hospital.emergency_load()
        + weights.incoming * hospital.incoming_assigned_count as f64
}

/// Scores every hospital that is accepting patients and sorts best-first.
/// Snapshots that fail validation are left out.
///
/// Ties are broken by the lexicographically smallest hospital id so the same input
/// always produces the same order.
pub fn rank_hospitals(
    pickup: Coordinate,
    hospitals: &[HospitalCapacitySnapshot],
    weights: &SelectorWeights,
) -> Result<Vec<HospitalSelection>> {
    pickup.validate()?;

    let mut ranked = Vec::with_capacity(hospitals.len());
    for hospital in hospitals.iter().filter(|h| h.accepting_patients) {
        // One bad report from the capacity feed must not block dispatch to the others.
        if let Err(e) = hospital.validate() {
            log::warn!("[Selection] Skipping hospital {}: {}", hospital.hospital_id, e);
            continue;
        }
        let distance = distance_meters(pickup, hospital.coordinate);
        ranked.push(HospitalSelection {
            hospital_id: hospital.hospital_id.clone(),
            coordinate: hospital.coordinate,
            score: hospital_score(weights, distance, hospital),
            distance_meters: distance,
        });
    }

    ranked.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.hospital_id.cmp(&b.hospital_id))
    });
    Ok(ranked)
}

/// Picks the best hospital for `pickup`, or `NoAvailableHospital` when no valid
/// snapshot accepts patients.
pub fn select_hospital(
    pickup: Coordinate,
    hospitals: &[HospitalCapacitySnapshot],
    weights: &SelectorWeights,
) -> Result<HospitalSelection> {
    let best = rank_hospitals(pickup, hospitals, weights)?
        .into_iter()
        .next()
        .ok_or(DispatchError::NoAvailableHospital)?;

    log::info!(
        "[Selection] Hospital {} chosen for pickup ({:.5}, {:.5}): score = {:.2}, distance = {:.0} m",
        best.hospital_id,
        pickup.latitude,
        pickup.longitude,
        best.score,
        best.distance_meters
    );
    Ok(best)
}
