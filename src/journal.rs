use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::engine::{EventKind, SideEffect};
use crate::model::*;

/// One accepted change. Appended before it is applied in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    AgencyConfigured(AgencyConfig),
    VehicleRegistered(Vehicle),
    VehicleStatusSet {
        vehicle_id: VehicleId,
        status: VehicleStatus,
    },
    MaintenanceRecorded {
        block: MaintenanceBlock,
        /// Vehicle status implied by the block, if it changes.
        vehicle_status: Option<VehicleStatus>,
    },
    BookingCreated {
        booking: Booking,
        effects: Vec<SideEffect>,
    },
    BookingTransitioned {
        booking: Booking,
        from: BookingStatus,
        event: EventKind,
        effects: Vec<SideEffect>,
    },
}

impl Record {
    /// Side effects committed with this record, in application order.
    pub fn effects(&self) -> Vec<SideEffect> {
        match self {
            Record::AgencyConfigured(_) | Record::VehicleRegistered(_) => Vec::new(),
            Record::VehicleStatusSet { vehicle_id, status } => vec![SideEffect::UpdateVehicleStatus {
                vehicle_id: *vehicle_id,
                status: *status,
            }],
            Record::MaintenanceRecorded {
                block,
                vehicle_status,
            } => vehicle_status
                .map(|status| SideEffect::UpdateVehicleStatus {
                    vehicle_id: block.vehicle_id,
                    status,
                })
                .into_iter()
                .collect(),
            Record::BookingCreated { effects, .. } | Record::BookingTransitioned { effects, .. } => {
                effects.clone()
            }
        }
    }

    /// The vehicle whose schedule this record changes. `None` for map-level records.
    pub fn vehicle_id(&self) -> Option<VehicleId> {
        match self {
            Record::AgencyConfigured(_) | Record::VehicleRegistered(_) => None,
            Record::VehicleStatusSet { vehicle_id, .. } => Some(*vehicle_id),
            Record::MaintenanceRecorded { block, .. } => Some(block.vehicle_id),
            Record::BookingCreated { booking, .. } | Record::BookingTransitioned { booking, .. } => {
                Some(booking.vehicle_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalError(pub String);

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for JournalError {}

impl From<io::Error> for JournalError {
    fn from(e: io::Error) -> Self {
        JournalError(e.to_string())
    }
}

/// Persistence collaborator. An `Err` means the record was not stored.
///
/// Records carry full booking and vehicle state, so replaying any suffix of
/// the journal over a newer snapshot converges on the latest state.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, record: &Record) -> Result<(), JournalError>;

    /// Records appended since the last compaction.
    async fn appends_since_compact(&self) -> u64;

    /// Drop the first `upto` records, which a saved snapshot now covers.
    /// Records appended after them are kept.
    async fn compact(&self, upto: u64) -> Result<(), JournalError>;
}

// ── In-process journal ───────────────────────────────────────────

/// In-process journal. Can be switched into a failing mode to exercise rollback paths.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<Record>>,
    failing: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }

    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, record: &Record) -> Result<(), JournalError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JournalError("journal unavailable".into()));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.records.lock().await.len() as u64
    }

    async fn compact(&self, upto: u64) -> Result<(), JournalError> {
        let mut records = self.records.lock().await;
        let upto = (upto as usize).min(records.len());
        records.drain(..upto);
        Ok(())
    }
}

// ── File journal ─────────────────────────────────────────────────

/// Append-only journal file, one JSON record per line.
///
/// Every append is flushed and synced before it returns. A torn last line
/// (crash mid-write) is discarded on replay.
pub struct FileJournal {
    path: PathBuf,
    inner: Mutex<FileJournalInner>,
}

struct FileJournalInner {
    writer: BufWriter<File>,
    appends_since_compact: u64,
}

impl FileJournal {
    /// Open (or create) the journal at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let appends_since_compact = match File::open(path) {
            Ok(file) => BufReader::new(file).lines().count() as u64,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileJournalInner {
                writer: open_append(path)?,
                appends_since_compact,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every valid record from disk. Reading stops at the first line
    /// that does not parse.
    pub fn replay(path: &Path) -> io::Result<Vec<Record>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("{}: discarding journal from line {}: {e}", path.display(), n + 1);
                    break;
                }
            }
        }
        Ok(records)
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

#[async_trait]
impl Journal for FileJournal {
    async fn append(&self, record: &Record) -> Result<(), JournalError> {
        let line = serde_json::to_string(record).map_err(|e| JournalError(e.to_string()))?;
        let mut inner = self.inner.lock().await;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        inner.writer.get_ref().sync_data()?;
        inner.appends_since_compact += 1;
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.inner.lock().await.appends_since_compact
    }

    /// Rewrite the file without its first `upto` lines: temp file, fsync, rename.
    async fn compact(&self, upto: u64) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().await;
        inner.writer.flush()?;

        let tail: Vec<String> = BufReader::new(File::open(&self.path)?)
            .lines()
            .skip(upto as usize)
            .collect::<io::Result<_>>()?;

        let tmp_path = self.path.with_extension("journal.tmp");
        let mut tmp = BufWriter::new(File::create(&tmp_path)?);
        for line in &tail {
            tmp.write_all(line.as_bytes())?;
            tmp.write_all(b"\n")?;
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        inner.writer = open_append(&self.path)?;
        inner.appends_since_compact = tail.len() as u64;
        Ok(())
    }
}
