//! In-memory violation store.

use super::{sort_by_timestamp, ViolationStore};
use crate::collector::types::ViolationEvent;
use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::RwLock;

/// Process-local store keyed by session. Used by tests, replay and as the
/// default server backend when no data directory is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Vec<ViolationEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events across all sessions.
    pub fn len(&self) -> usize {
        self.events
            .read()
            .map(|events| events.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationStore for MemoryStore {
    fn append(&self, event: &ViolationEvent) -> Result<ViolationEvent, StoreError> {
        let mut events = self
            .events
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        events
            .entry(event.session_id.clone())
            .or_default()
            .push(event.clone());
        Ok(event.clone())
    }

    fn list_by_session(&self, session_id: &str) -> Result<Vec<ViolationEvent>, StoreError> {
        let events = self
            .events
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        let mut list = events.get(session_id).cloned().unwrap_or_default();
        sort_by_timestamp(&mut list);
        Ok(list)
    }
}
