//! Fire-and-forget violation writer.

use super::ViolationStore;
use crate::collector::types::ViolationEvent;
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Queue depth between the exam flow and the writer thread.
const QUEUE_CAPACITY: usize = 1024;

enum Command {
    Append(ViolationEvent),
    Flush(Sender<()>),
}

/// Write outcome counters.
#[derive(Debug, Default)]
pub struct SinkStats {
    written: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`SinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkCounts {
    pub written: u64,
    pub retried: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl SinkStats {
    pub fn counts(&self) -> SinkCounts {
        SinkCounts {
            written: self.written.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Background writer in front of a [`ViolationStore`].
///
/// `append` never blocks. Each write is retried at most once; a second
/// failure is logged and counted, never surfaced to the exam flow.
pub struct ViolationSink {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    store: Arc<dyn ViolationStore>,
    stats: Arc<SinkStats>,
}

impl ViolationSink {
    pub fn spawn(store: Arc<dyn ViolationStore>) -> Self {
        let (sender, receiver) = bounded::<Command>(QUEUE_CAPACITY);
        let stats = Arc::new(SinkStats::default());

        let worker_store = store.clone();
        let worker_stats = stats.clone();
        let worker = thread::Builder::new()
            .name("violation-sink".to_string())
            .spawn(move || {
                for command in receiver {
                    match command {
                        Command::Append(event) => {
                            write_with_retry(worker_store.as_ref(), &event, &worker_stats)
                        }
                        Command::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to start violation writer: {e}");
                None
            }
        };

        Self {
            sender: worker.as_ref().map(|_| sender),
            worker,
            store,
            stats,
        }
    }

    /// Queue an event for writing.
    pub fn append(&self, event: ViolationEvent) {
        let Some(sender) = &self.sender else {
            // No writer thread: write inline rather than lose the event.
            write_with_retry(self.store.as_ref(), &event, &self.stats);
            return;
        };

        match sender.try_send(Command::Append(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(Command::Append(event)))
            | Err(TrySendError::Disconnected(Command::Append(event))) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    session_id = %event.session_id,
                    kind = %event.kind,
                    "violation writer unavailable, event kept in session log only"
                );
            }
            Err(_) => {}
        }
    }

    /// Wait until everything queued before this call has been written.
    /// Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(sender) = &self.sender else {
            return true;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if sender.send_timeout(Command::Flush(ack_tx), timeout).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Read through to the underlying store.
    pub fn list_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ViolationEvent>, crate::error::StoreError> {
        self.store.list_by_session(session_id)
    }

    pub fn stats(&self) -> SinkCounts {
        self.stats.counts()
    }
}

impl Drop for ViolationSink {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn write_with_retry(store: &dyn ViolationStore, event: &ViolationEvent, stats: &SinkStats) {
    match store.append(event) {
        Ok(_) => {
            stats.written.fetch_add(1, Ordering::Relaxed);
        }
        Err(first) => {
            stats.retried.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(event_id = %event.id, "violation write failed, retrying: {first}");
            match store.append(event) {
                Ok(_) => {
                    stats.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(second) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        event_id = %event.id,
                        session_id = %event.session_id,
                        kind = %event.kind,
                        "violation write failed after retry: {second}"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{Severity, ViolationType};
    use crate::error::StoreError;
    use crate::sink::MemoryStore;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` appends, then delegates to memory.
    struct FlakyStore {
        failures: AtomicUsize,
        attempts: AtomicUsize,
        inner: MemoryStore,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
                inner: MemoryStore::new(),
            }
        }
    }

    impl ViolationStore for FlakyStore {
        fn append(&self, event: &ViolationEvent) -> Result<ViolationEvent, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("flaky".to_string()));
            }
            self.inner.append(event)
        }

        fn list_by_session(&self, session_id: &str) -> Result<Vec<ViolationEvent>, StoreError> {
            self.inner.list_by_session(session_id)
        }
    }

    fn event() -> ViolationEvent {
        ViolationEvent::new("s1", ViolationType::TabSwitch, Severity::Critical, Utc::now())
    }

    #[test]
    fn test_append_then_flush_is_readable() {
        let sink = ViolationSink::spawn(Arc::new(MemoryStore::new()));
        for _ in 0..5 {
            sink.append(event());
        }
        assert!(sink.flush(Duration::from_secs(5)));
        assert_eq!(sink.list_by_session("s1").unwrap().len(), 5);
        assert_eq!(sink.stats().written, 5);
    }

    #[test]
    fn test_single_failure_is_retried() {
        let store = Arc::new(FlakyStore::new(1));
        let sink = ViolationSink::spawn(store.clone());
        sink.append(event());
        assert!(sink.flush(Duration::from_secs(5)));

        let stats = sink.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_at_most_once() {
        let store = Arc::new(FlakyStore::new(10));
        let sink = ViolationSink::spawn(store.clone());
        sink.append(event());
        assert!(sink.flush(Duration::from_secs(5)));

        assert_eq!(sink.stats().failed, 1);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert!(sink.list_by_session("s1").unwrap().is_empty());
    }

    #[test]
    fn test_drop_drains_queue() {
        let store = Arc::new(MemoryStore::new());
        {
            let sink = ViolationSink::spawn(store.clone());
            for _ in 0..20 {
                sink.append(event());
            }
        }
        assert_eq!(store.len(), 20);
    }
}
