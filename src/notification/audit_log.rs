use crate::notification::event_bus::EmergencyObserver;
use crate::shared_data::{DispatchEvent, EmergencyEventRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender, SyncSender};
use std::thread;

/// Appends `record` to `path`, writing the header row only when the file is new.
pub fn log_to_csv<T: Serialize>(path: &Path, record: &T) -> Result<(), Box<dyn Error>> {
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, Box<dyn Error>> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut records = Vec::new();
    for record in rdr.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

enum AuditMessage {
    Row(EmergencyEventRecord),
    Flush(SyncSender<()>),
}

/// Audit trail observer: one CSV row per dispatch event.
///
/// Rows are handed to a writer thread, the same way `AmqpPublisher` keeps its connection
/// off the lifecycle tasks. A single writer also keeps rows from concurrent lifecycles
/// from interleaving.
pub struct CsvAuditLog {
    path: PathBuf,
    outbound: Sender<AuditMessage>,
}

impl CsvAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (outbound, inbox) = mpsc::channel::<AuditMessage>();
        let target = path.clone();

        thread::spawn(move || {
            for message in inbox {
                match message {
                    AuditMessage::Row(record) => {
                        if let Err(e) = log_to_csv(&target, &record) {
                            log::error!("Error writing audit record to {}: {}", target.display(), e);
                        }
                    }
                    AuditMessage::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { path, outbound }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until every row queued so far is on disk.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.outbound.send(AuditMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    pub fn records(&self) -> Result<Vec<EmergencyEventRecord>, Box<dyn Error>> {
        self.flush();
        read_csv(&self.path)
    }
}

impl fmt::Debug for CsvAuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvAuditLog").field("path", &self.path).finish()
    }
}

impl Drop for CsvAuditLog {
    fn drop(&mut self) {
        self.flush();
    }
}

impl EmergencyObserver for CsvAuditLog {
    fn on_event(&self, event: &DispatchEvent) {
        if self.outbound.send(AuditMessage::Row(EmergencyEventRecord::from(event))).is_err() {
            log::error!("Audit writer for {} has stopped; dropping record", self.path.display());
        }
    }
}
