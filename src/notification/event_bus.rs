use std::sync::Arc;

use parking_lot::RwLock;

use crate::shared_data::DispatchEvent;

/// Anything that wants to hear about transitions and signal actions: dashboards,
/// audit trails, message queues. The core never learns who is listening.
pub trait EmergencyObserver: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Fan-out of events to every subscribed observer. Cloning shares the subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<RwLock<Vec<Arc<dyn EmergencyObserver>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn EmergencyObserver>) {
        self.observers.write().push(observer);
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn emit(&self, event: DispatchEvent) {
        for observer in self.observers.read().iter() {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.subscriber_count())
            .finish()
    }
}

/// Mirrors every event into the application log.
#[derive(Debug, Default)]
pub struct LogObserver;

impl EmergencyObserver for LogObserver {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::StatusChanged {
                request_id,
                vehicle_id,
                from,
                to,
                hospital_id,
                ..
            } => log::info!(
                "[Event] Request {} (vehicle {}, hospital {}): {:?} -> {:?}",
                request_id,
                vehicle_id,
                hospital_id,
                from,
                to
            ),
            DispatchEvent::SignalCommandIssued(command) => log::info!(
                "[Event] Request {}: {:?} on signal {}",
                command.request_id,
                command.action,
                command.signal_id
            ),
        }
    }
}
