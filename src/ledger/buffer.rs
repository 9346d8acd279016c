//! Local buffer for records that have not reached the remote ledger.
//!
//! ```text
//! <data-dir>/
//!   diagnostics-buffer.jsonl     # records waiting for connectivity
//!   diagnostics-inflight.jsonl   # records handed to an upload not yet confirmed
//! ```

use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use crate::model::DiagnosticsRecord;

use super::Result;

const BUFFER_FILE: &str = "diagnostics-buffer.jsonl";
const JOURNAL_FILE: &str = "diagnostics-inflight.jsonl";

/// File-backed buffer of unflushed records.
pub struct LocalBuffer {
    dir: PathBuf,
}

impl LocalBuffer {
    /// Creates a buffer in `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn buffer_path(&self) -> PathBuf {
        self.dir.join(BUFFER_FILE)
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Appends a record to the buffer.
    pub fn append(&self, record: &DiagnosticsRecord) -> Result<()> {
        append_lines(&self.buffer_path(), std::slice::from_ref(record))
    }

    /// Loads the buffered records, oldest first.
    pub fn load(&self) -> Result<Vec<DiagnosticsRecord>> {
        load_lines(&self.buffer_path())
    }

    /// Loads the in-flight journal, if an earlier upload left one behind.
    pub fn load_journal(&self) -> Result<Option<Vec<DiagnosticsRecord>>> {
        let path = self.journal_path();
        if !path.exists() {
            return Ok(None);
        }
        load_lines(&path).map(Some)
    }

    /// Moves the buffered records into the journal and returns them.
    ///
    /// The buffer is empty afterwards. Records already in the journal stay
    /// ahead of the staged ones.
    pub fn stage(&self) -> Result<Vec<DiagnosticsRecord>> {
        let buffer = self.buffer_path();
        let journal = self.journal_path();
        if buffer.exists() {
            if journal.exists() {
                let records = load_lines(&buffer)?;
                append_lines(&journal, &records)?;
                fs::remove_file(&buffer)?;
            } else {
                fs::rename(&buffer, &journal)?;
            }
        }
        Ok(self.load_journal()?.unwrap_or_default())
    }

    /// Forgets the journal once its records are confirmed remote.
    pub fn clear_journal(&self) -> Result<()> {
        match fs::remove_file(self.journal_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Records held locally: journal first, then buffer.
    pub fn pending(&self) -> Result<Vec<DiagnosticsRecord>> {
        let mut records = self.load_journal()?.unwrap_or_default();
        records.extend(self.load()?);
        Ok(records)
    }
}

fn append_lines(path: &Path, records: &[DiagnosticsRecord]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut lines = String::new();
    for record in records {
        lines.push_str(&serde_json::to_string(record)?);
        lines.push('\n');
    }
    file.write_all(lines.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Reads records line by line. A line cut short by power loss is skipped.
fn load_lines(path: &Path) -> Result<Vec<DiagnosticsRecord>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let reader = io::BufReader::new(file);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "skipping unreadable buffered record"
            ),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::model::parse_utc;

    fn test_buffer() -> (TempDir, LocalBuffer) {
        let dir = TempDir::new().unwrap();
        let buffer = LocalBuffer::new(dir.path().join("data")).unwrap();
        (dir, buffer)
    }

    fn sample_record(error: &str) -> DiagnosticsRecord {
        DiagnosticsRecord {
            id: Some(Uuid::new_v4()),
            timestamp: parse_utc("2024-03-12 10:30Z").unwrap(),
            next_startup_time: parse_utc("2024-03-12 11:00Z").unwrap(),
            battery_voltage: Some(3.6),
            internal_voltage: None,
            internal_current: None,
            temperature: None,
            signal_quality: None,
            latitude: None,
            longitude: None,
            height: None,
            error: error.to_string(),
        }
    }

    #[test]
    fn append_and_load_in_order() {
        let (_dir, buffer) = test_buffer();
        let a = sample_record("a");
        let b = sample_record("b");

        buffer.append(&a).unwrap();
        buffer.append(&b).unwrap();

        assert_eq!(buffer.load().unwrap(), vec![a, b]);
    }

    #[test]
    fn load_empty() {
        let (_dir, buffer) = test_buffer();
        assert!(buffer.load().unwrap().is_empty());
        assert_eq!(buffer.load_journal().unwrap(), None);
    }

    #[test]
    fn stage_moves_buffer_into_journal() {
        let (_dir, buffer) = test_buffer();
        let a = sample_record("a");
        buffer.append(&a).unwrap();

        let staged = buffer.stage().unwrap();

        assert_eq!(staged, vec![a.clone()]);
        assert!(buffer.load().unwrap().is_empty());
        assert_eq!(buffer.load_journal().unwrap(), Some(vec![a]));
    }

    #[test]
    fn stage_keeps_older_journal_first() {
        let (_dir, buffer) = test_buffer();
        let a = sample_record("a");
        let b = sample_record("b");
        buffer.append(&a).unwrap();
        buffer.stage().unwrap();
        buffer.append(&b).unwrap();

        assert_eq!(buffer.stage().unwrap(), vec![a, b]);
    }

    #[test]
    fn clear_journal_is_idempotent() {
        let (_dir, buffer) = test_buffer();
        buffer.append(&sample_record("a")).unwrap();
        buffer.stage().unwrap();

        buffer.clear_journal().unwrap();
        buffer.clear_journal().unwrap();
        assert_eq!(buffer.load_journal().unwrap(), None);
    }

    #[test]
    fn truncated_line_is_skipped() {
        let (_dir, buffer) = test_buffer();
        let a = sample_record("a");
        buffer.append(&a).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(buffer.buffer_path())
            .unwrap()
            .write_all(b"{\"id\":\"12")
            .unwrap();

        assert_eq!(buffer.load().unwrap(), vec![a]);
    }

    #[test]
    fn pending_lists_journal_then_buffer() {
        let (_dir, buffer) = test_buffer();
        let a = sample_record("a");
        let b = sample_record("b");
        buffer.append(&a).unwrap();
        buffer.stage().unwrap();
        buffer.append(&b).unwrap();

        assert_eq!(buffer.pending().unwrap(), vec![a, b]);
    }
}
