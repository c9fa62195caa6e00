// monitoring/mod.rs
pub mod corridor_monitor;
