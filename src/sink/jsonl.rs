//! Append-only JSON Lines violation store.
//!
//! One event per line. The file is the audit trail of record, so lines are
//! never rewritten; unreadable lines are skipped with a warning on read.

use super::{sort_by_timestamp, ViolationStore};
use crate::collector::types::ViolationEvent;
use crate::error::StoreError;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open (or lazily create) a store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every event in the file, in file order.
    pub fn read_all(&self) -> Result<Vec<ViolationEvent>, StoreError> {
        read_events(&self.path)
    }
}

/// Read every parseable event from a JSONL file. A missing file is empty.
pub fn read_events(path: &Path) -> Result<Vec<ViolationEvent>, StoreError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut events = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ViolationEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = number + 1,
                "skipping unreadable violation record: {e}"
            ),
        }
    }
    Ok(events)
}

impl ViolationStore for JsonlStore {
    fn append(&self, event: &ViolationEvent) -> Result<ViolationEvent, StoreError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(event.clone())
    }

    fn list_by_session(&self, session_id: &str) -> Result<Vec<ViolationEvent>, StoreError> {
        let mut events: Vec<_> = self
            .read_all()?
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect();
        sort_by_timestamp(&mut events);
        Ok(events)
    }
}
