// lifecycle/mod.rs
pub mod emergency_lifecycle;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::collaborators::{CapacityProvider, RoutingService, SignalControl, SignalDirectory};
use crate::config::DispatchConfig;
use crate::control_system::signal_proximity_engine::SignalProximityEngine;
use crate::models::signal::SignalCommand;
use crate::notification::EventBus;
use crate::shared_data::DispatchEvent;

pub use emergency_lifecycle::EmergencyLifecycle;

/// Collaborators and shared state every lifecycle needs. Cheap to clone.
#[derive(Clone)]
pub struct DispatchContext {
    pub config: DispatchConfig,
    pub routing: Arc<dyn RoutingService>,
    pub capacity: Arc<dyn CapacityProvider>,
    pub signal_directory: Arc<dyn SignalDirectory>,
    pub signal_control: Arc<dyn SignalControl>,
    pub events: EventBus,
    /// One engine for the whole process so a signal can only be claimed once.
    pub engine: Arc<Mutex<SignalProximityEngine>>,
}

impl DispatchContext {
    pub fn new(
        config: DispatchConfig,
        routing: Arc<dyn RoutingService>,
        capacity: Arc<dyn CapacityProvider>,
        signal_directory: Arc<dyn SignalDirectory>,
        signal_control: Arc<dyn SignalControl>,
    ) -> Self {
        let engine = SignalProximityEngine::new(config.proximity);
        Self {
            config,
            routing,
            capacity,
            signal_directory,
            signal_control,
            events: EventBus::new(),
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Pushes commands to signal control and announces each one. Fire-and-forget.
    pub fn dispatch_commands(&self, commands: Vec<SignalCommand>) {
        for command in commands {
            self.signal_control.send(&command);
            self.events.emit(DispatchEvent::SignalCommandIssued(command));
        }
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
