use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::geo::Coordinate;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HospitalId(pub String);

impl HospitalId {
    pub fn new(id: impl Into<String>) -> Self {
        HospitalId(id.into())
    }
}

impl std::fmt::Display for HospitalId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capacity of one hospital as reported by the capacity collaborator. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalCapacitySnapshot {
    pub hospital_id: HospitalId,
    pub coordinate: Coordinate,
    pub total_beds: u32,
    pub occupied_beds: u32,
    pub icu_beds: u32,
    pub occupied_icu_beds: u32,
    pub emergency_beds: u32,
    pub occupied_emergency_beds: u32,
    pub accepting_patients: bool,
    pub incoming_assigned_count: u32,
}

impl HospitalCapacitySnapshot {
    pub fn validate(&self) -> Result<()> {
        self.coordinate.validate()?;
        let categories = [
            ("general", self.occupied_beds, self.total_beds),
            ("icu", self.occupied_icu_beds, self.icu_beds),
            ("emergency", self.occupied_emergency_beds, self.emergency_beds),
        ];
        for (name, occupied, total) in categories {
            if occupied > total {
                return Err(DispatchError::InvalidInput(format!(
                    "hospital {} reports {} occupied {} beds out of {}",
                    self.hospital_id, occupied, name, total
                )));
            }
        }
        Ok(())
    }

    /// Occupied share of ICU beds; a hospital without ICU beds counts as fully loaded.
    pub fn icu_load(&self) -> f64 {
        load_ratio(self.occupied_icu_beds, self.icu_beds)
    }

    pub fn emergency_load(&self) -> f64 {
        load_ratio(self.occupied_emergency_beds, self.emergency_beds)
    }
}

fn load_ratio(occupied: u32, total: u32) -> f64 {
    if total == 0 {
        1.0
    } else {
        occupied as f64 / total as f64
    }
}
