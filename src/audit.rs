//! Pipeline audit counters.
//!
//! Tracks how much sensor data flowed through a session monitor and what
//! happened to it, without retaining any of the data itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one session monitor.
#[derive(Debug)]
pub struct AuditLog {
    /// Scheduler ticks processed
    ticks: AtomicU64,
    /// Host signals delivered to collectors
    signals: AtomicU64,
    /// Detections reported by collectors
    raw_detections: AtomicU64,
    /// Detections admitted as violations
    admitted: AtomicU64,
    /// Detections dropped inside a cooldown window
    throttled: AtomicU64,
    /// Collector start or sampling failures
    collector_errors: AtomicU64,
    /// Session start time
    started_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            signals: AtomicU64::new(0),
            raw_detections: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            collector_errors: AtomicU64::new(0),
            started_at,
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection(&self) {
        self.raw_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collector_error(&self) {
        self.collector_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters. `now` bounds the reported session duration.
    pub fn stats(&self, now: DateTime<Utc>) -> AuditStats {
        AuditStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            raw_detections: self.raw_detections.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            collector_errors: self.collector_errors.load(Ordering::Relaxed),
            started_at: self.started_at,
            duration_secs: (now - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the end of a session.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let stats = self.stats(now);
        format!(
            "Session Monitoring Statistics:\n\
             - Ticks processed: {}\n\
             - Host signals handled: {}\n\
             - Raw detections: {}\n\
             - Violations recorded: {}\n\
             - Detections throttled: {}\n\
             - Collector errors: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Data Handling:\n\
             - No camera frames or audio samples retained\n\
             - Only violation type, severity and time are stored",
            stats.ticks,
            stats.signals,
            stats.raw_detections,
            stats.admitted,
            stats.throttled,
            stats.collector_errors,
            stats.duration_secs
        )
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.signals.store(0, Ordering::Relaxed);
        self.raw_detections.store(0, Ordering::Relaxed);
        self.admitted.store(0, Ordering::Relaxed);
        self.throttled.store(0, Ordering::Relaxed);
        self.collector_errors.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of audit counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub ticks: u64,
    pub signals: u64,
    pub raw_detections: u64,
    pub admitted: u64,
    pub throttled: u64,
    pub collector_errors: u64,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
}

impl AuditStats {
    /// Write the stats as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Thread-safe shared audit log.
pub type SharedAuditLog = Arc<AuditLog>;
