//! The diagnostics ledger: one record per run, appended to the remote store.
//!
//! Records that cannot be uploaded wait in a local buffer and go out ahead of
//! the next run's record. Uploads pass through an in-flight journal so an
//! upload that lands but is never confirmed is not repeated.

mod buffer;
mod encoding;

use std::collections::HashSet;
use std::io;

use jiff::Timestamp;
use uuid::Uuid;

use crate::model::{DiagnosticsRecord, GpsFix, PowerState};
use crate::store::{RemoteStore, StoreError};

pub use buffer::LocalBuffer;
pub use encoding::{LedgerDocument, decode_mapped, decode_tabular, encode_records};

/// Canonical remote ledger, a YAML list of maps.
pub const LEDGER_FILE: &str = "diagnostics.yaml";

/// Ledger written by older cameras. Read once for migration, never written.
pub const LEGACY_LEDGER_FILE: &str = "diagnostics.csv";

/// Errors from the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed legacy ledger: {0}")]
    Csv(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = core::result::Result<T, LedgerError>;

/// What a flush did with the run's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// This many records reached the remote ledger; nothing is pending.
    Uploaded { records: usize },

    /// No connectivity; this many records wait locally.
    Buffered { pending: usize },
}

/// Build the run's record from what the stages produced.
pub fn assemble(
    timestamp: Timestamp,
    next_startup_time: Timestamp,
    power: Option<&PowerState>,
    fix: Option<&GpsFix>,
    signal_quality: Option<u8>,
    error: String,
) -> DiagnosticsRecord {
    DiagnosticsRecord {
        id: Some(Uuid::new_v4()),
        timestamp,
        next_startup_time,
        battery_voltage: power.map(|p| p.battery_voltage),
        internal_voltage: power.and_then(|p| p.internal_voltage),
        internal_current: power.and_then(|p| p.internal_current),
        temperature: power.and_then(|p| p.temperature),
        signal_quality,
        latitude: fix.map(|f| f.latitude),
        longitude: fix.map(|f| f.longitude),
        height: fix.map(|f| f.height_meters),
        error,
    }
}

/// The local side of the ledger.
pub struct DiagnosticsLedger {
    buffer: LocalBuffer,
}

impl DiagnosticsLedger {
    pub fn new(buffer: LocalBuffer) -> Self {
        Self { buffer }
    }

    /// Records not yet confirmed remote, oldest first.
    pub fn pending(&self) -> Result<Vec<DiagnosticsRecord>> {
        self.buffer.pending()
    }

    /// Record a run and push everything pending to the remote store.
    ///
    /// The record is written to the local buffer before anything is uploaded,
    /// so a failed upload leaves it pending rather than lost. A legacy ledger
    /// that cannot be migrated is noted in the record and left behind.
    pub fn flush(
        &self,
        mut record: DiagnosticsRecord,
        mut store: Option<&mut dyn RemoteStore>,
    ) -> Result<FlushOutcome> {
        record.id.get_or_insert_with(Uuid::new_v4);
        if let Some(store) = store.as_deref_mut()
            && let Err(e) = migrate_legacy(store)
        {
            tracing::warn!(error = %e, "legacy ledger not migrated");
            if !record.error.is_empty() {
                record.error.push_str("; ");
            }
            record.error.push_str(&format!("ledger migration: {e}"));
        }
        self.buffer.append(&record)?;

        let Some(store) = store else {
            let pending = self.buffer.pending()?.len();
            tracing::info!(pending, "remote store unreachable, record buffered");
            return Ok(FlushOutcome::Buffered { pending });
        };

        let recovered = self.recover_journal(store)?;

        let staged = self.buffer.stage()?;
        store.append_records(LEDGER_FILE, &staged)?;
        self.buffer.clear_journal()?;

        let records = recovered + staged.len();
        tracing::info!(records, "diagnostics uploaded");
        Ok(FlushOutcome::Uploaded { records })
    }

    /// Finish an upload an earlier run could not confirm.
    ///
    /// Journal records already in the remote ledger are dropped; the rest are
    /// appended. Returns how many were appended.
    fn recover_journal(&self, store: &mut dyn RemoteStore) -> Result<usize> {
        let Some(journal) = self.buffer.load_journal()? else {
            return Ok(0);
        };

        let mut seen: HashSet<Uuid> = read_remote(store)?
            .iter()
            .filter_map(|r| r.id)
            .collect();
        let missing: Vec<DiagnosticsRecord> = journal
            .into_iter()
            .filter(|r| r.id.is_none_or(|id| seen.insert(id)))
            .collect();

        tracing::warn!(
            missing = missing.len(),
            "recovering unconfirmed upload from journal"
        );
        if !missing.is_empty() {
            store.append_records(LEDGER_FILE, &missing)?;
        }
        self.buffer.clear_journal()?;
        Ok(missing.len())
    }
}

/// Read the remote ledger in whichever encoding it exists.
pub fn read_remote(store: &mut dyn RemoteStore) -> Result<Vec<DiagnosticsRecord>> {
    for name in [LEDGER_FILE, LEGACY_LEDGER_FILE] {
        match store.download_file(name) {
            Ok(bytes) => {
                let document = LedgerDocument::decode(&String::from_utf8_lossy(&bytes))?;
                return Ok(document.into_records());
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Vec::new())
}

/// Convert a legacy ledger to the canonical one, if only the legacy one exists.
///
/// Returns how many records were carried over. The legacy file is left as is.
pub fn migrate_legacy(store: &mut dyn RemoteStore) -> Result<Option<usize>> {
    if store.exists(LEDGER_FILE)? || !store.exists(LEGACY_LEDGER_FILE)? {
        return Ok(None);
    }

    let bytes = store.download_file(LEGACY_LEDGER_FILE)?;
    let records = decode_tabular(&String::from_utf8_lossy(&bytes))?;
    store.upload_file(LEDGER_FILE, encode_records(&records)?.as_bytes())?;

    tracing::info!(records = records.len(), "migrated legacy ledger");
    Ok(Some(records.len()))
}
