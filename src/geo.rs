// geo.rs
//
// Pure great-circle helpers shared by hospital selection and the signal proximity engine.
// Nothing here holds state.

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting anything outside |lat| <= 90, |lng| <= 180.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let coordinate = Self {
            latitude,
            longitude,
        };
        coordinate.validate()?;
        Ok(coordinate)
    }

    /// Re-checks the range invariant. Coordinates that arrive through serde skip `new`,
    /// so every entry point calls this before trusting one.
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || self.latitude.abs() > 90.0 {
            return Err(DispatchError::InvalidInput(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || self.longitude.abs() > 180.0 {
            return Err(DispatchError::InvalidInput(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Coarse approach direction a signal uses to pick which phase to favour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TravelDirection {
    Northbound,
    Eastbound,
    Southbound,
    Westbound,
}

/// Haversine distance in meters. Symmetric, and 0 for identical points.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Seconds needed to cover `distance_meters` at `speed_kmh`.
///
/// A non-positive speed yields `InvalidInput`; callers treat that as "ETA unknown".
pub fn eta_seconds(distance_meters: f64, speed_kmh: f64) -> Result<f64> {
    if !(speed_kmh > 0.0) || !speed_kmh.is_finite() {
        return Err(DispatchError::InvalidInput(format!(
            "speed must be positive to estimate arrival, got {} km/h",
            speed_kmh
        )));
    }
    if !distance_meters.is_finite() || distance_meters < 0.0 {
        return Err(DispatchError::InvalidInput(format!(
            "distance must be a non-negative number, got {}",
            distance_meters
        )));
    }
    Ok(distance_meters / (speed_kmh * 1000.0 / 3600.0))
}

/// Maps a heading onto 90° sectors centred on N, E, S and W.
///
/// Total: any heading is normalised into [0, 360) first, and a non-finite
/// heading is read as due north.
pub fn travel_direction(heading_degrees: f64) -> TravelDirection {
    let heading = if heading_degrees.is_finite() {
        heading_degrees.rem_euclid(360.0)
    } else {
        0.0
    };
    if !(45.0..315.0).contains(&heading) {
        TravelDirection::Northbound
    } else if heading < 135.0 {
        TravelDirection::Eastbound
    } else if heading < 225.0 {
        TravelDirection::Southbound
    } else {
        TravelDirection::Westbound
    }
}

/// Initial great-circle bearing from `from` to `to`, in [0, 360).
pub fn bearing_degrees(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lng = (to.longitude - from.longitude).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Signed difference `target - heading`, folded into (-180, 180].
pub fn heading_delta_degrees(heading: f64, target: f64) -> f64 {
    let delta = (target - heading).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// Distance from `point` to the segment `a`-`b`, on a local equirectangular projection.
/// Accurate to a few meters over city-scale segments.
pub fn distance_to_segment_meters(point: Coordinate, a: Coordinate, b: Coordinate) -> f64 {
    let reference_lat = point.latitude.to_radians();
    let project = |c: Coordinate| {
        (
            (c.longitude - point.longitude).to_radians() * reference_lat.cos() * EARTH_RADIUS_METERS,
            (c.latitude - point.latitude).to_radians() * EARTH_RADIUS_METERS,
        )
    };
    let (ax, ay) = project(a);
    let (bx, by) = project(b);
    let (dx, dy) = (bx - ax, by - ay);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (-(ax * dx + ay * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}
