//! Screen-presence collector.
//!
//! Screen sharing is mandatory. When the candidate stops sharing, the
//! collector reports a FULLSCREEN_EXIT-class violation and keeps re-prompting
//! until sharing resumes. While sharing, it captures periodic snapshots and
//! hands them to a [`SnapshotUploader`].

use crate::collector::types::{Detection, HostSignal, ViolationType};
use crate::collector::{Collector, Emit};
use crate::config::Config;
use crate::error::{CollectorError, SensorKind, StoreError};
use crate::scheduler::Cadence;
use crate::sensor::{ScreenShare, TrackGuard};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde_json::json;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the collector checks the share and re-prompts.
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Destination for periodic screen snapshots.
pub trait SnapshotUploader: Send {
    fn upload(&mut self, taken_at: DateTime<Utc>, jpeg: &[u8]) -> Result<(), StoreError>;
}

/// Writes snapshots to `<dir>/screen_<millis>.jpg` and refreshes `<dir>/latest.jpg`.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    dir: PathBuf,
}

impl DirectoryUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Snapshot directory for one session under the data path.
    pub fn for_session(data_path: &std::path::Path, session_id: &str) -> Self {
        Self::new(data_path.join("snapshots").join(session_id))
    }
}

impl SnapshotUploader for DirectoryUploader {
    fn upload(&mut self, taken_at: DateTime<Utc>, jpeg: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!("screen_{}.jpg", taken_at.timestamp_millis());
        std::fs::write(self.dir.join(name), jpeg)?;
        std::fs::write(self.dir.join("latest.jpg"), jpeg)?;
        Ok(())
    }
}

/// Runs another uploader on a background thread so captures never block a tick.
///
/// Snapshots are dropped (and logged) when the queue is full.
pub struct BackgroundUploader {
    sender: Option<Sender<(DateTime<Utc>, Vec<u8>)>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundUploader {
    pub fn spawn(mut inner: Box<dyn SnapshotUploader>) -> Self {
        let (sender, receiver) = bounded::<(DateTime<Utc>, Vec<u8>)>(8);
        let handle = thread::spawn(move || {
            for (taken_at, jpeg) in receiver {
                if let Err(e) = inner.upload(taken_at, &jpeg) {
                    tracing::warn!("Snapshot upload failed: {}", e);
                }
            }
        });
        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }
}

impl SnapshotUploader for BackgroundUploader {
    fn upload(&mut self, taken_at: DateTime<Utc>, jpeg: &[u8]) -> Result<(), StoreError> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(StoreError::Unavailable("uploader shut down".into()));
        };
        match sender.try_send((taken_at, jpeg.to_vec())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Snapshot queue full; dropping capture");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(StoreError::Unavailable("uploader thread exited".into()))
            }
        }
    }
}

impl Drop for BackgroundUploader {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct ScreenPresenceCollector {
    screen: Box<dyn ScreenShare>,
    uploader: Option<Box<dyn SnapshotUploader>>,
    snapshot_interval: chrono::Duration,
    track: Option<TrackGuard>,
    running: bool,
    needs_reshare: bool,
    last_snapshot: Option<DateTime<Utc>>,
    snapshots_taken: u64,
}

impl ScreenPresenceCollector {
    pub fn new(screen: Box<dyn ScreenShare>, config: &Config) -> Self {
        Self {
            screen,
            uploader: None,
            snapshot_interval: chrono::Duration::from_std(config.snapshot_interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            track: None,
            running: false,
            needs_reshare: false,
            last_snapshot: None,
            snapshots_taken: 0,
        }
    }

    pub fn with_uploader(mut self, uploader: Box<dyn SnapshotUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn is_sharing(&self) -> bool {
        self.track.as_ref().map(TrackGuard::is_live).unwrap_or(false)
    }

    pub fn needs_reshare(&self) -> bool {
        self.needs_reshare
    }

    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken
    }

    fn share_lost(&mut self, now: DateTime<Utc>, reason: &str, emit: Emit<'_>) {
        if let Some(mut track) = self.track.take() {
            track.release();
            self.needs_reshare = true;
            tracing::warn!(reason, "Screen sharing stopped; re-prompting");
            emit(Detection::new(ViolationType::FullscreenExit, now).with_metadata(json!({
                "source": "screen_share",
                "reason": reason,
            })));
        }
    }

    fn reprompt(&mut self) {
        match self.screen.open() {
            Ok(track) => {
                tracing::info!("Screen sharing resumed");
                self.track = Some(track);
                self.needs_reshare = false;
            }
            Err(e) => tracing::debug!("Screen share re-prompt declined: {}", e),
        }
    }

    fn snapshot_if_due(&mut self, now: DateTime<Utc>) -> Result<(), CollectorError> {
        let due = self
            .last_snapshot
            .map(|last| now - last >= self.snapshot_interval)
            .unwrap_or(true);
        if !due {
            return Ok(());
        }
        self.last_snapshot = Some(now);

        let Some(jpeg) = self.screen.capture()? else {
            return Ok(());
        };
        self.snapshots_taken += 1;
        if let Some(uploader) = self.uploader.as_mut() {
            if let Err(e) = uploader.upload(now, &jpeg) {
                tracing::warn!("Snapshot upload failed: {}", e);
            }
        }
        Ok(())
    }
}

impl Collector for ScreenPresenceCollector {
    fn name(&self) -> &'static str {
        "screen"
    }

    fn sensor(&self) -> SensorKind {
        SensorKind::Screen
    }

    fn cadence(&self) -> Cadence {
        Cadence::Interval(CHECK_INTERVAL)
    }

    fn start(&mut self, _now: DateTime<Utc>) -> Result<(), CollectorError> {
        if self.running {
            return Err(CollectorError::AlreadyRunning);
        }
        match self.screen.open() {
            Ok(track) => {
                self.track = Some(track);
                self.needs_reshare = false;
            }
            Err(source) => {
                // Sharing is mandatory: stay running so the candidate is re-prompted.
                self.running = true;
                self.needs_reshare = true;
                return Err(CollectorError::SensorUnavailable {
                    kind: SensorKind::Screen,
                    source,
                });
            }
        }
        self.running = true;
        self.last_snapshot = None;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut track) = self.track.take() {
            track.release();
        }
        self.running = false;
        self.needs_reshare = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn poll(&mut self, now: DateTime<Utc>, emit: Emit<'_>) -> Result<(), CollectorError> {
        if !self.running {
            return Ok(());
        }
        if self.track.as_ref().map(|t| !t.is_live()).unwrap_or(false) {
            self.share_lost(now, "track_ended", emit);
        }
        if self.needs_reshare {
            self.reprompt();
            return Ok(());
        }
        self.snapshot_if_due(now)
    }

    fn on_signal(&mut self, signal: HostSignal, now: DateTime<Utc>, emit: Emit<'_>) {
        if self.running && signal == HostSignal::ScreenShareEnded {
            self.share_lost(now, "share_stopped", emit);
        }
    }

    fn warning(&self) -> Option<String> {
        if self.running && self.needs_reshare {
            Some("Screen sharing is required! Please restart screen sharing.".into())
        } else {
            None
        }
    }
}
