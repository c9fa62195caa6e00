// config.rs
//
// Tunables for hospital scoring and the green corridor. Everything has a default so a
// missing or partial JSON file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::Path;

use crate::global_variables::CONFIG_ENV_VAR;

/// Upper bound for every duration setting: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Weights of the composite hospital score (lower score wins).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorWeights {
    /// Per meter between pickup and hospital.
    pub distance: f64,
    /// Multiplies the occupied ICU share.
    pub icu_load: f64,
    /// Multiplies the occupied emergency-bed share.
    pub emergency_load: f64,
    /// Per patient already on the way to the hospital.
    pub incoming: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        Self {
            distance: 1.0,
            icu_load: 50_000.0,
            emergency_load: 30_000.0,
            incoming: 20_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub trigger_radius_m: f64,
    pub release_radius_m: f64,
    pub grant_duration_secs: u64,
    /// How far from the route polyline a signal may sit and still count as "on the route".
    pub corridor_width_m: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            trigger_radius_m: 300.0,
            release_radius_m: 500.0,
            grant_duration_secs: 15 * 60,
            corridor_width_m: 150.0,
        }
    }
}

impl ProximityConfig {
    /// Clamped to `MAX_DURATION_SECS`; configurations built in code skip `check`.
    pub fn grant_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grant_duration_secs.min(MAX_DURATION_SECS) as i64)
    }

    /// Period of the background expiry sweep: a quarter of the grant window.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs((self.grant_duration_secs.min(MAX_DURATION_SECS) / 4).max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub selector: SelectorWeights,
    pub proximity: ProximityConfig,
    /// Telemetry older than this flags the vehicle as stale.
    pub stale_after_secs: u64,
    /// Total routing attempts per transition (first call plus retries).
    pub route_attempts: u32,
    /// Mailbox size of each per-request lifecycle task.
    pub command_buffer: usize,
    /// Closed requests kept for `lookup`; the oldest are dropped beyond this.
    pub archive_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            selector: SelectorWeights::default(),
            proximity: ProximityConfig::default(),
            stale_after_secs: 30,
            route_attempts: 2,
            command_buffer: 32,
            archive_capacity: 1024,
        }
    }
}

impl DispatchConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: DispatchConfig = serde_json::from_str(&raw)?;
        config.check()?;
        Ok(config)
    }

    /// Reads the file named by `GREEN_CORRIDOR_CONFIG`, or returns defaults when it is unset.
    pub fn load() -> Result<Self, Box<dyn Error>> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => {
                log::info!("Loading dispatch configuration from {}", path);
                Self::from_json_file(path)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs.min(MAX_DURATION_SECS) as i64)
    }

    fn check(&self) -> Result<(), String> {
        let p = &self.proximity;
        // Written as negated comparisons so NaN fails too.
        if !(p.trigger_radius_m > 0.0) || !p.trigger_radius_m.is_finite() {
            return Err(format!("trigger radius {} m must be a positive distance", p.trigger_radius_m));
        }
        if !(p.release_radius_m >= p.trigger_radius_m) || !p.release_radius_m.is_finite() {
            return Err(format!(
                "release radius ({} m) must be at least the trigger radius ({} m)",
                p.release_radius_m, p.trigger_radius_m
            ));
        }
        if !(p.corridor_width_m >= 0.0) || !p.corridor_width_m.is_finite() {
            return Err(format!("corridor width {} m must be a non-negative distance", p.corridor_width_m));
        }
        if p.grant_duration_secs == 0 || p.grant_duration_secs > MAX_DURATION_SECS {
            return Err(format!(
                "grant duration must be between 1 and {} seconds, got {}",
                MAX_DURATION_SECS, p.grant_duration_secs
            ));
        }
        if self.stale_after_secs == 0 || self.stale_after_secs > MAX_DURATION_SECS {
            return Err(format!(
                "stale_after_secs must be between 1 and {}, got {}",
                MAX_DURATION_SECS, self.stale_after_secs
            ));
        }
        if self.archive_capacity == 0 {
            return Err("archive_capacity must be positive".to_string());
        }
        if self.route_attempts == 0 || self.command_buffer == 0 {
            return Err("route_attempts and command_buffer must be positive".to_string());
        }
        Ok(())
    }
}
