//! Violation sink.
//!
//! Admitted violations are appended to a [`ViolationStore`]. The exam flow
//! never waits on a store: [`ViolationSink`] hands events to a background
//! writer thread that retries a failed write once and then gives up with a
//! log line.

pub mod jsonl;
pub mod memory;
#[cfg(feature = "remote")]
pub mod remote;
pub mod writer;

use crate::collector::types::ViolationEvent;
use crate::error::StoreError;
use std::sync::Arc;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
#[cfg(feature = "remote")]
pub use remote::{BlockingRemoteStore, RemoteConfig, RemoteStore};
pub use writer::{SinkCounts, SinkStats, ViolationSink};

/// Durable home for violation events.
pub trait ViolationStore: Send + Sync {
    /// Persist an event and return the stored record.
    fn append(&self, event: &ViolationEvent) -> Result<ViolationEvent, StoreError>;

    /// All events of a session, ordered by timestamp ascending.
    fn list_by_session(&self, session_id: &str) -> Result<Vec<ViolationEvent>, StoreError>;
}

impl<T: ViolationStore + ?Sized> ViolationStore for Arc<T> {
    fn append(&self, event: &ViolationEvent) -> Result<ViolationEvent, StoreError> {
        (**self).append(event)
    }

    fn list_by_session(&self, session_id: &str) -> Result<Vec<ViolationEvent>, StoreError> {
        (**self).list_by_session(session_id)
    }
}

/// Sort events by timestamp. Stable, so equal timestamps keep arrival order.
pub(crate) fn sort_by_timestamp(events: &mut [ViolationEvent]) {
    events.sort_by_key(|e| e.timestamp);
}
