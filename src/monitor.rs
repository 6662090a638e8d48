//! Session lifecycle.
//!
//! A [`SessionMonitor`] owns the collectors of one exam session and drives
//! them from the host's frame loop:
//!
//! ```text
//! host ticks ──→ Scheduler ──→ Collector::poll ─┐
//!                                               ├─→ Throttler ──→ ViolationSink
//! host signals ──→ Collector::on_signal ────────┘        │
//!                                                       └─→ session log (in memory)
//! ```
//!
//! The in-memory session log is authoritative for scoring; the sink is a
//! best-effort durable copy.

use crate::audit::{AuditLog, AuditStats};
use crate::clock::{Clock, SystemClock};
use crate::collector::types::{Detection, HostSignal, ViolationEvent};
use crate::collector::Collector;
use crate::config::Config;
use crate::error::{LifecycleError, StoreError};
use crate::scheduler::Scheduler;
use crate::scoring::{CredibilityScore, ScoringEngine};
use crate::session::{SessionStatus, SessionSubmitter};
use crate::sink::{SinkCounts, ViolationSink, ViolationStore};
use crate::throttle::Throttler;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Host signals buffered between ticks.
const SIGNAL_CAPACITY: usize = 256;

/// How long completion waits for queued violation writes.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts made to record completion before giving up.
const SUBMIT_ATTEMPTS: usize = 2;

/// Where a monitor is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    /// Created, collectors not yet started
    Idle,
    /// `in_progress`: collectors running
    Running,
    /// Collectors stopped, completion not yet recorded
    PendingSubmit,
    /// `completed`: score frozen
    Completed,
}

pub struct SessionMonitor {
    session_id: String,
    collectors: Vec<Box<dyn Collector>>,
    slots: Vec<usize>,
    scheduler: Scheduler,
    start_failures: BTreeMap<&'static str, String>,
    throttler: Arc<Throttler>,
    sink: ViolationSink,
    submitter: Arc<dyn SessionSubmitter>,
    clock: Arc<dyn Clock>,
    engine: ScoringEngine,
    signal_tx: Sender<HostSignal>,
    signal_rx: Receiver<HostSignal>,
    log: Vec<ViolationEvent>,
    audit: AuditLog,
    phase: MonitorPhase,
    ended_at: Option<DateTime<Utc>>,
    frozen: Option<CredibilityScore>,
}

impl SessionMonitor {
    pub fn new(
        session_id: impl Into<String>,
        config: &Config,
        store: Arc<dyn ViolationStore>,
        submitter: Arc<dyn SessionSubmitter>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (signal_tx, signal_rx) = bounded(SIGNAL_CAPACITY);
        Self {
            session_id: session_id.into(),
            collectors: Vec::new(),
            slots: Vec::new(),
            scheduler: Scheduler::new(),
            start_failures: BTreeMap::new(),
            throttler: Arc::new(Throttler::from_config(config)),
            sink: ViolationSink::spawn(store),
            submitter,
            audit: AuditLog::new(clock.now()),
            clock,
            engine: ScoringEngine::from_config(config),
            signal_tx,
            signal_rx,
            log: Vec::new(),
            phase: MonitorPhase::Idle,
            ended_at: None,
            frozen: None,
        }
    }

    /// Use a different time source (a `ManualClock` in tests and replay).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.audit = AuditLog::new(clock.now());
        self.clock = clock;
        self
    }

    /// Share a throttler with other monitors.
    pub fn with_throttler(mut self, throttler: Arc<Throttler>) -> Self {
        self.throttler = throttler;
        self
    }

    pub fn add_collector(&mut self, collector: Box<dyn Collector>) {
        let slot = self.scheduler.register(collector.cadence());
        self.slots.push(slot);
        self.collectors.push(collector);
    }

    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        self.add_collector(collector);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    /// Enter `in_progress`: reset cooldowns and start every collector.
    ///
    /// The session must exist and still be in progress. A collector that cannot acquire its sensor is reported through
    /// [`warnings`](Self::warnings); the others keep running.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        match self.phase {
            MonitorPhase::Idle => {}
            MonitorPhase::Running => return Ok(()),
            MonitorPhase::PendingSubmit | MonitorPhase::Completed => {
                return Err(LifecycleError::AlreadyCompleted(self.session_id.clone()));
            }
        }

        self.check_session()?;

        let now = self.clock.now();
        self.throttler.reset_session(&self.session_id);
        self.scheduler.reset();
        self.start_failures.clear();

        for collector in &mut self.collectors {
            match collector.start(now) {
                Ok(()) => tracing::info!(collector = collector.name(), "collector started"),
                Err(e) => {
                    tracing::warn!(
                        collector = collector.name(),
                        sensor = %collector.sensor(),
                        "collector unavailable, continuing without it: {e}"
                    );
                    self.audit.record_collector_error();
                    self.start_failures.insert(collector.name(), e.to_string());
                }
            }
        }

        self.phase = MonitorPhase::Running;
        tracing::info!(session_id = %self.session_id, collectors = self.collectors.len(), "monitoring started");
        Ok(())
    }

    /// Handle for pushing host transitions from another thread.
    pub fn signal_sender(&self) -> Sender<HostSignal> {
        self.signal_tx.clone()
    }

    /// Queue a host transition for the next tick.
    pub fn push_signal(&self, signal: HostSignal) {
        if self.signal_tx.try_send(signal).is_err() {
            tracing::warn!(?signal, "host signal queue full, signal dropped");
        }
    }

    /// Run one scheduling step. Returns the violations admitted by it.
    pub fn tick(&mut self) -> Vec<ViolationEvent> {
        if self.phase != MonitorPhase::Running {
            return Vec::new();
        }
        let now = self.clock.now();
        self.audit.record_tick();

        let mut detections: Vec<Detection> = Vec::new();

        // Signals first: they describe transitions that already happened.
        let signals: Vec<HostSignal> = self.signal_rx.try_iter().collect();
        for signal in signals {
            self.audit.record_signal();
            let mut emit = |d: Detection| detections.push(d);
            for collector in self.collectors.iter_mut().filter(|c| c.is_running()) {
                collector.on_signal(signal, now, &mut emit);
            }
        }

        for (collector, &slot) in self.collectors.iter_mut().zip(&self.slots) {
            if !collector.is_running() || !self.scheduler.take_due(slot, now) {
                continue;
            }
            let mut emit = |d: Detection| detections.push(d);
            if let Err(e) = collector.poll(now, &mut emit) {
                self.audit.record_collector_error();
                tracing::warn!(collector = collector.name(), "sampling failed: {e}");
            }
        }

        let mut admitted = Vec::new();
        for detection in detections {
            self.audit.record_detection();
            match self.throttler.admit_detection(&self.session_id, detection) {
                Some(event) => {
                    self.audit.record_admitted();
                    tracing::info!(
                        session_id = %self.session_id,
                        kind = %event.kind,
                        severity = %event.severity,
                        "{}",
                        event.kind.message()
                    );
                    self.log.push(event.clone());
                    self.sink.append(event.clone());
                    admitted.push(event);
                }
                None => self.audit.record_throttled(),
            }
        }
        admitted
    }

    /// Blocking warnings the candidate must resolve.
    pub fn warnings(&self) -> Vec<String> {
        self.collectors
            .iter()
            .filter_map(|c| {
                c.warning().or_else(|| {
                    if c.is_running() {
                        None
                    } else {
                        self.start_failures.get(c.name()).cloned()
                    }
                })
            })
            .collect()
    }

    /// Enter `completed`: stop collectors, flush writes, record completion
    /// and freeze the score.
    ///
    /// If recording completion fails after one retry the monitor stays in
    /// [`MonitorPhase::PendingSubmit`] and [`retry_submit`](Self::retry_submit)
    /// can be called.
    pub fn complete(&mut self) -> Result<CredibilityScore, LifecycleError> {
        match self.phase {
            MonitorPhase::Completed => {
                return Err(LifecycleError::AlreadyCompleted(self.session_id.clone()))
            }
            MonitorPhase::PendingSubmit => return self.submit(),
            MonitorPhase::Idle => self.check_session()?,
            MonitorPhase::Running => {}
        }

        self.stop_collectors();
        if !self.sink.flush(FLUSH_TIMEOUT) {
            tracing::warn!(session_id = %self.session_id, "timed out flushing violation writes");
        }
        self.throttler.reset_session(&self.session_id);
        self.ended_at = Some(self.clock.now());
        self.phase = MonitorPhase::PendingSubmit;

        self.submit()
    }

    /// Confirm the session is known and still in progress.
    fn check_session(&self) -> Result<(), LifecycleError> {
        let status = self
            .submitter
            .session_status(&self.session_id)
            .map_err(|source| LifecycleError::LookupFailed {
                session_id: self.session_id.clone(),
                source,
            })?;
        match status {
            Some(SessionStatus::InProgress) => Ok(()),
            Some(SessionStatus::Completed) => {
                Err(LifecycleError::AlreadyCompleted(self.session_id.clone()))
            }
            None => Err(LifecycleError::UnknownSession(self.session_id.clone())),
        }
    }

    /// Retry a failed completion submission.
    pub fn retry_submit(&mut self) -> Result<CredibilityScore, LifecycleError> {
        match self.phase {
            MonitorPhase::PendingSubmit => self.submit(),
            MonitorPhase::Completed => Err(LifecycleError::AlreadyCompleted(self.session_id.clone())),
            MonitorPhase::Idle | MonitorPhase::Running => {
                Err(LifecycleError::NothingToSubmit(self.session_id.clone()))
            }
        }
    }

    fn submit(&mut self) -> Result<CredibilityScore, LifecycleError> {
        let ended_at = self.ended_at.unwrap_or_else(|| self.clock.now());
        let mut last_error: Option<StoreError> = None;

        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.submitter.submit_completion(&self.session_id, ended_at) {
                Ok(()) => {
                    let score = self.engine.score(&self.log);
                    tracing::info!(
                        session_id = %self.session_id,
                        score = score.score,
                        violations = score.total_violations,
                        "session completed"
                    );
                    self.frozen = Some(score.clone());
                    self.phase = MonitorPhase::Completed;
                    return Ok(score);
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, attempt, "completion submit failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| StoreError::Unavailable("no submission attempted".to_string()));
        tracing::error!(session_id = %self.session_id, "completion not recorded, retry required: {source}");
        Err(LifecycleError::SubmitFailed {
            session_id: self.session_id.clone(),
            source,
        })
    }

    /// Current score. Frozen once the session is completed.
    pub fn score(&self) -> CredibilityScore {
        match &self.frozen {
            Some(score) => score.clone(),
            None => self.engine.score(&self.log),
        }
    }

    /// Admitted violations in admission order.
    pub fn violations(&self) -> &[ViolationEvent] {
        &self.log
    }

    /// Violations as persisted by the store, falling back to the in-memory
    /// log when the store cannot be read.
    pub fn stored_violations(&self) -> Vec<ViolationEvent> {
        match self.sink.list_by_session(&self.session_id) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, "violation store unreadable: {e}");
                let mut list = self.log.clone();
                list.sort_by_key(|v| v.timestamp);
                list
            }
        }
    }

    pub fn audit(&self) -> AuditStats {
        self.audit.stats(self.clock.now())
    }

    pub fn audit_summary(&self) -> String {
        self.audit.summary(self.clock.now())
    }

    pub fn sink_stats(&self) -> SinkCounts {
        self.sink.stats()
    }

    /// Wait for queued violation writes.
    pub fn flush(&self) -> bool {
        self.sink.flush(FLUSH_TIMEOUT)
    }

    pub fn collector(&self, name: &str) -> Option<&dyn Collector> {
        self.collectors
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    fn stop_collectors(&mut self) {
        for collector in &mut self.collectors {
            if collector.is_running() {
                collector.stop();
                tracing::debug!(collector = collector.name(), "collector stopped");
            }
        }
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.stop_collectors();
    }
}
