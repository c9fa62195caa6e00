use crate::global_variables::{
    AMQP_URL, EMERGENCY_EVENTS_CSV, QUEUE_EMERGENCY_EVENTS, QUEUE_SIGNAL_COMMANDS, SIGNAL_COMMANDS_CSV,
};
use crate::models::signal::SignalCommand;
use crate::notification::audit_log::{log_to_csv, read_csv};
use crate::shared_data::{DispatchEvent, EmergencyEventRecord};
use amiquip::{Connection, ConsumerMessage, ConsumerOptions, QueueDeclareOptions, Result as AmiquipResult};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::error::Error;
use std::io::{stdin, stdout, Write};
use std::path::Path;

/// Totals over an audit trail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSummary {
    pub status_changes: usize,
    pub grants: usize,
    pub extends: usize,
    pub releases: usize,
    /// Signals granted and not yet released, at the end of the trail.
    pub signals_held: BTreeSet<String>,
}

pub fn summarize(records: &[EmergencyEventRecord]) -> MonitorSummary {
    let mut summary = MonitorSummary::default();
    for record in records {
        match record.kind.as_str() {
            "status" => summary.status_changes += 1,
            "grant" => {
                summary.grants += 1;
                summary.signals_held.insert(record.subject.clone());
            }
            "extend" => summary.extends += 1,
            "release" => {
                summary.releases += 1;
                summary.signals_held.remove(&record.subject);
            }
            other => log::debug!("Unrecognised audit record kind '{}'", other),
        }
    }
    summary
}

// Consumes one queue until the connection closes, turning every message into an audit row.
fn consume_queue<T, F>(queue_name: &'static str, csv_file: &'static str, to_record: F) -> AmiquipResult<()>
where
    T: DeserializeOwned,
    F: Fn(T) -> EmergencyEventRecord,
{
    let mut connection = Connection::insecure_open(AMQP_URL)?;
    let channel = connection.open_channel(None)?;
    let queue = channel.queue_declare(queue_name, QueueDeclareOptions::default())?;
    let consumer = queue.consume(ConsumerOptions::default())?;
    log::info!("[Monitor] Listening on '{}'", queue_name);

    for message in consumer.receiver() {
        match message {
            ConsumerMessage::Delivery(delivery) => {
                match serde_json::from_slice::<T>(&delivery.body) {
                    Ok(payload) => {
                        if let Err(e) = log_to_csv(Path::new(csv_file), &to_record(payload)) {
                            log::error!("[Monitor] Error logging to {}: {}", csv_file, e);
                        }
                    }
                    Err(e) => log::warn!("[Monitor] Unreadable message on '{}': {}", queue_name, e),
                }
                consumer.ack(delivery)?;
            }
            other => {
                log::info!("[Monitor] Consumer for '{}' ended: {:?}", queue_name, other);
                break;
            }
        }
    }
    connection.close()
}

// Listens to the "emergency_events" queue and logs each incoming event.
pub async fn listen_emergency_events() -> AmiquipResult<()> {
    tokio::task::spawn_blocking(|| {
        consume_queue(QUEUE_EMERGENCY_EVENTS, EMERGENCY_EVENTS_CSV, |event: DispatchEvent| {
            EmergencyEventRecord::from(&event)
        })
    })
    .await
    .unwrap_or_else(|e| {
        log::error!("[Monitor] Emergency event listener panicked: {}", e);
        Ok(())
    })
}

// Listens to the "signal_commands" queue and logs each incoming command.
pub async fn listen_signal_commands() -> AmiquipResult<()> {
    tokio::task::spawn_blocking(|| {
        consume_queue(QUEUE_SIGNAL_COMMANDS, SIGNAL_COMMANDS_CSV, |command: SignalCommand| {
            EmergencyEventRecord::from(&DispatchEvent::SignalCommandIssued(command))
        })
    })
    .await
    .unwrap_or_else(|e| {
        log::error!("[Monitor] Signal command listener panicked: {}", e);
        Ok(())
    })
}

fn show_records(path: &str) -> Result<(), Box<dyn Error>> {
    let records: Vec<EmergencyEventRecord> = read_csv(Path::new(path))?;
    for record in &records {
        println!(
            "{} | {} | {:<7} | {} | {}",
            record.timestamp, record.request_id, record.kind, record.subject, record.detail
        );
    }
    println!("{} record(s) in {}", records.len(), path);
    Ok(())
}

fn show_summary() -> Result<(), Box<dyn Error>> {
    let mut records: Vec<EmergencyEventRecord> = read_csv(Path::new(EMERGENCY_EVENTS_CSV)).unwrap_or_default();
    records.retain(|r| r.kind == "status");
    records.extend(read_csv::<EmergencyEventRecord>(Path::new(SIGNAL_COMMANDS_CSV)).unwrap_or_default());
    let summary = summarize(&records);
    println!("Status changes : {}", summary.status_changes);
    println!("Grants         : {}", summary.grants);
    println!("Extensions     : {}", summary.extends);
    println!("Releases       : {}", summary.releases);
    println!("Signals held   : {:?}", summary.signals_held);
    Ok(())
}

pub async fn run_cli() {
    loop {
        println!("\nGreen Corridor Monitor");
        println!("1. Display Emergency Events");
        println!("2. Display Signal Commands");
        println!("3. Corridor Summary");
        println!("4. Exit");
        print!("Enter your choice: ");
        let _ = stdout().flush();

        let mut input = String::new();
        if stdin().read_line(&mut input).is_err() {
            break;
        }
        let result = match input.trim().parse::<u32>().unwrap_or(0) {
            1 => show_records(EMERGENCY_EVENTS_CSV),
            2 => show_records(SIGNAL_COMMANDS_CSV),
            3 => show_summary(),
            4 => {
                println!("Exiting monitor.");
                break;
            }
            _ => {
                println!("Invalid choice, try again.");
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("Could not read records: {}", e);
        }
    }
}
