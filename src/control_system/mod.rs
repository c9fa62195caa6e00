// control_system/mod.rs
pub mod signal_proximity_engine;
