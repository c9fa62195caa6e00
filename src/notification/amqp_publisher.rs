use crate::collaborators::SignalControl;
use crate::global_variables::{QUEUE_EMERGENCY_EVENTS, QUEUE_SIGNAL_COMMANDS};
use crate::models::signal::SignalCommand;
use crate::notification::event_bus::EmergencyObserver;
use crate::shared_data::DispatchEvent;
use amiquip::{Channel, Connection, Exchange, Publish, QueueDeclareOptions, Result as AmiquipResult};
use serde::Serialize;
use std::error::Error;
use std::sync::mpsc::{self, Sender};
use std::thread;

/// Publishes events and signal commands to RabbitMQ.
///
/// amiquip is blocking, so the connection lives on its own thread and callers only push
/// onto a channel. Publishing therefore never stalls a lifecycle task.
pub struct AmqpPublisher {
    outbound: Sender<(&'static str, String)>,
}

fn open(url: &str) -> AmiquipResult<(Connection, Channel)> {
    let mut connection = Connection::insecure_open(url)?;
    let channel = connection.open_channel(None)?;
    channel.queue_declare(QUEUE_EMERGENCY_EVENTS, QueueDeclareOptions::default())?;
    channel.queue_declare(QUEUE_SIGNAL_COMMANDS, QueueDeclareOptions::default())?;
    Ok((connection, channel))
}

impl AmqpPublisher {
    pub fn connect(url: &str) -> Result<Self, Box<dyn Error>> {
        let (outbound, inbox) = mpsc::channel::<(&'static str, String)>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);
        let target = url.to_string();

        thread::spawn(move || {
            let (connection, channel) = match open(&target) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            let exchange = Exchange::direct(&channel);
            for (queue, payload) in inbox {
                if let Err(e) = exchange.publish(Publish::new(payload.as_bytes(), queue)) {
                    log::warn!("[AmqpPublisher] Failed to publish to '{}': {}", queue, e);
                }
            }
            if let Err(e) = connection.close() {
                log::warn!("[AmqpPublisher] Error closing connection: {}", e);
            }
        });

        ready_rx.recv()??;
        log::info!("[AmqpPublisher] Connected to {}", url_host(url));
        Ok(Self { outbound })
    }

    fn publish<T: Serialize>(&self, queue: &'static str, record: &T) {
        match serde_json::to_string(record) {
            Ok(json) => {
                if self.outbound.send((queue, json)).is_err() {
                    log::warn!("[AmqpPublisher] Publisher thread has stopped; dropping message for '{}'", queue);
                }
            }
            Err(e) => log::warn!("[AmqpPublisher] Could not serialise message for '{}': {}", queue, e),
        }
    }
}

// Strips credentials before logging.
fn url_host(url: &str) -> &str {
    url.rsplit('@').next().unwrap_or(url)
}

impl EmergencyObserver for AmqpPublisher {
    fn on_event(&self, event: &DispatchEvent) {
        self.publish(QUEUE_EMERGENCY_EVENTS, event);
    }
}

impl SignalControl for AmqpPublisher {
    fn send(&self, command: &SignalCommand) {
        self.publish(QUEUE_SIGNAL_COMMANDS, command);
    }
}
