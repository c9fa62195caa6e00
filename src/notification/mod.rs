// notification/mod.rs
pub mod amqp_publisher;
pub mod audit_log;
pub mod event_bus;

pub use event_bus::{EmergencyObserver, EventBus, LogObserver};
