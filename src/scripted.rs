//! Scripted sensor implementations.
//!
//! These stand in for real hardware: recorded face frames for replay, and
//! fully scripted sensors for exercising the pipeline without a camera,
//! microphone or screen. Every track they hand out reports its release
//! through a shared [`TrackLedger`].

use crate::error::{SensorError, SensorKind};
use crate::sensor::{
    AudioAnalyser, Embedding, FaceEmbedder, FaceFrame, FaceLandmarker, MediaTrack, ScreenShare,
    TrackGuard,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts opened and released tracks.
#[derive(Debug, Clone, Default)]
pub struct TrackLedger {
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl TrackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Tracks opened but not yet released.
    pub fn outstanding(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }

    fn open(&self, kind: SensorKind, live: Arc<AtomicBool>) -> TrackGuard {
        self.opened.fetch_add(1, Ordering::SeqCst);
        live.store(true, Ordering::SeqCst);
        TrackGuard::new(Box::new(ScriptedTrack {
            kind,
            live,
            released: self.released.clone(),
            stopped: false,
        }))
    }
}

struct ScriptedTrack {
    kind: SensorKind,
    live: Arc<AtomicBool>,
    released: Arc<AtomicUsize>,
    stopped: bool,
}

impl MediaTrack for ScriptedTrack {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn is_live(&self) -> bool {
        !self.stopped && self.live.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Face landmarker that plays back a queue of frames.
///
/// Once the queue is empty it keeps returning the last frame, or `None`
/// when `repeat_last` is off.
pub struct ScriptedLandmarker {
    frames: VecDeque<FaceFrame>,
    last: Option<FaceFrame>,
    repeat_last: bool,
    deny: bool,
    ledger: TrackLedger,
}

impl ScriptedLandmarker {
    pub fn new(frames: impl IntoIterator<Item = FaceFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            last: None,
            repeat_last: false,
            deny: false,
            ledger: TrackLedger::new(),
        }
    }

    /// Keep returning the final frame after the script runs out.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Refuse camera access.
    pub fn denied() -> Self {
        let mut landmarker = Self::new(Vec::new());
        landmarker.deny = true;
        landmarker
    }

    pub fn with_ledger(mut self, ledger: TrackLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn push(&mut self, frame: FaceFrame) {
        self.frames.push_back(frame);
    }
}

impl FaceLandmarker for ScriptedLandmarker {
    fn open(&mut self) -> Result<TrackGuard, SensorError> {
        if self.deny {
            return Err(SensorError::PermissionDenied(SensorKind::Camera));
        }
        Ok(self
            .ledger
            .open(SensorKind::Camera, Arc::new(AtomicBool::new(true))))
    }

    fn detect(&mut self, _at: DateTime<Utc>) -> Result<Option<FaceFrame>, SensorError> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.last = Some(frame.clone());
                Ok(Some(frame))
            }
            None if self.repeat_last => Ok(self.last.clone()),
            None => Ok(None),
        }
    }
}

/// Audio analyser returning a fixed spectrum level.
pub struct ScriptedAudio {
    level: Arc<AtomicUsize>,
    bins: usize,
    deny: bool,
    ledger: TrackLedger,
}

impl ScriptedAudio {
    /// `level` is the value of every frequency bin (0-255).
    pub fn new(level: u8) -> Self {
        Self {
            level: Arc::new(AtomicUsize::new(level as usize)),
            bins: 128,
            deny: false,
            ledger: TrackLedger::new(),
        }
    }

    pub fn denied() -> Self {
        let mut audio = Self::new(0);
        audio.deny = true;
        audio
    }

    pub fn with_ledger(mut self, ledger: TrackLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Handle for changing the level while the collector owns the analyser.
    pub fn level_handle(&self) -> Arc<AtomicUsize> {
        self.level.clone()
    }
}

impl AudioAnalyser for ScriptedAudio {
    fn open(&mut self) -> Result<TrackGuard, SensorError> {
        if self.deny {
            return Err(SensorError::PermissionDenied(SensorKind::Microphone));
        }
        Ok(self
            .ledger
            .open(SensorKind::Microphone, Arc::new(AtomicBool::new(true))))
    }

    fn frequency_data(&mut self) -> Result<Vec<u8>, SensorError> {
        let level = self.level.load(Ordering::SeqCst).min(255) as u8;
        Ok(vec![level; self.bins])
    }
}

/// Embedder with a scripted reference and a queue of live embeddings.
pub struct ScriptedEmbedder {
    reference: Option<Embedding>,
    frames: VecDeque<Option<Embedding>>,
    ledger: TrackLedger,
}

impl ScriptedEmbedder {
    pub fn new(reference: Option<Embedding>) -> Self {
        Self {
            reference,
            frames: VecDeque::new(),
            ledger: TrackLedger::new(),
        }
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = Option<Embedding>>) -> Self {
        self.frames = frames.into_iter().collect();
        self
    }

    pub fn with_ledger(mut self, ledger: TrackLedger) -> Self {
        self.ledger = ledger;
        self
    }
}

impl FaceEmbedder for ScriptedEmbedder {
    fn open(&mut self) -> Result<TrackGuard, SensorError> {
        Ok(self
            .ledger
            .open(SensorKind::Embedder, Arc::new(AtomicBool::new(true))))
    }

    fn embed_reference(&mut self) -> Result<Option<Embedding>, SensorError> {
        Ok(self.reference.clone())
    }

    fn embed_frame(&mut self) -> Result<Option<Embedding>, SensorError> {
        Ok(self.frames.pop_front().flatten())
    }
}

/// Screen share whose liveness can be toggled from outside.
pub struct ScriptedScreen {
    live: Arc<AtomicBool>,
    deny: Arc<AtomicBool>,
    captures: Arc<AtomicUsize>,
    ledger: TrackLedger,
}

impl ScriptedScreen {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(false)),
            deny: Arc::new(AtomicBool::new(false)),
            captures: Arc::new(AtomicUsize::new(0)),
            ledger: TrackLedger::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: TrackLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Flag the candidate flips by stopping or refusing the share.
    pub fn controls(&self) -> ScreenControls {
        ScreenControls {
            live: self.live.clone(),
            deny: self.deny.clone(),
            captures: self.captures.clone(),
        }
    }
}

impl Default for ScriptedScreen {
    fn default() -> Self {
        Self::new()
    }
}

/// External handle on a [`ScriptedScreen`].
#[derive(Debug, Clone)]
pub struct ScreenControls {
    live: Arc<AtomicBool>,
    deny: Arc<AtomicBool>,
    captures: Arc<AtomicUsize>,
}

impl ScreenControls {
    /// Simulate the candidate pressing "stop sharing".
    pub fn end_share(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn set_denied(&self, denied: bool) {
        self.deny.store(denied, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl ScreenShare for ScriptedScreen {
    fn open(&mut self) -> Result<TrackGuard, SensorError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SensorError::PermissionDenied(SensorKind::Screen));
        }
        Ok(self.ledger.open(SensorKind::Screen, self.live.clone()))
    }

    fn capture(&mut self) -> Result<Option<Vec<u8>>, SensorError> {
        if !self.live.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        // JPEG start/end markers are enough for a placeholder image.
        Ok(Some(vec![0xFF, 0xD8, 0xFF, 0xD9]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_tracks_release() {
        let ledger = TrackLedger::new();
        let mut audio = ScriptedAudio::new(10).with_ledger(ledger.clone());
        let guard = audio.open().unwrap();
        assert_eq!(ledger.outstanding(), 1);
        drop(guard);
        assert_eq!(ledger.outstanding(), 0);
        assert_eq!(ledger.released(), 1);
    }

    #[test]
    fn test_landmarker_script_order() {
        let mut landmarker = ScriptedLandmarker::new(vec![FaceFrame::default()]);
        assert!(landmarker.detect(Utc::now()).unwrap().is_some());
        assert!(landmarker.detect(Utc::now()).unwrap().is_none());

        let mut repeating = ScriptedLandmarker::new(vec![FaceFrame::default()]).repeating();
        repeating.detect(Utc::now()).unwrap();
        assert!(repeating.detect(Utc::now()).unwrap().is_some());
    }

    #[test]
    fn test_screen_end_share_marks_track_dead() {
        let mut screen = ScriptedScreen::new();
        let controls = screen.controls();
        let guard = screen.open().unwrap();
        assert!(guard.is_live());
        controls.end_share();
        assert!(!guard.is_live());
    }
}
