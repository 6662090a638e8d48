//! Identity verifier: compares the live camera frame to the reference photo.
//!
//! A similarity of exactly zero means the embedder produced nothing (model not
//! loaded, no face in frame). That is "no signal", never a mismatch.

use crate::collector::types::{Detection, ViolationType};
use crate::collector::{Collector, Emit};
use crate::config::{Config, IdentityConfig};
use crate::error::{CollectorError, SensorError, SensorKind};
use crate::scheduler::Cadence;
use crate::sensor::{Embedding, FaceEmbedder, TrackGuard};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Consecutive no-signal reads after which a warning is logged.
const NO_SIGNAL_WARN_AFTER: u32 = 12;

pub struct IdentityVerifier {
    embedder: Box<dyn FaceEmbedder>,
    config: IdentityConfig,
    reference: Option<Embedding>,
    track: Option<TrackGuard>,
    last_compared: Option<DateTime<Utc>>,
    last_similarity: Option<f64>,
    no_signal_streak: u32,
}

impl IdentityVerifier {
    pub fn new(embedder: Box<dyn FaceEmbedder>, config: &Config) -> Self {
        Self {
            embedder,
            config: config.identity,
            reference: None,
            track: None,
            last_compared: None,
            last_similarity: None,
            no_signal_streak: 0,
        }
    }

    pub fn last_similarity(&self) -> Option<f64> {
        self.last_similarity
    }

    /// Consecutive comparisons that yielded no signal.
    pub fn no_signal_streak(&self) -> u32 {
        self.no_signal_streak
    }

    fn compare_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_compared else {
            return true;
        };
        let interval = chrono::Duration::from_std(self.config.compare_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        now - last >= interval
    }
}

/// Cosine similarity of two embeddings. Zero when either is empty, the
/// lengths differ, or a vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl Collector for IdentityVerifier {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn sensor(&self) -> SensorKind {
        SensorKind::Embedder
    }

    fn cadence(&self) -> Cadence {
        Cadence::Interval(self.config.check_interval)
    }

    fn start(&mut self, _now: DateTime<Utc>) -> Result<(), CollectorError> {
        if self.track.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        let unavailable = |source| CollectorError::SensorUnavailable {
            kind: SensorKind::Embedder,
            source,
        };

        let track = self.embedder.open().map_err(unavailable)?;
        // The track is dropped (and released) if the reference cannot be embedded.
        let reference = self
            .embedder
            .embed_reference()
            .map_err(unavailable)?
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| unavailable(SensorError::MissingReference))?;

        self.reference = Some(reference);
        self.track = Some(track);
        self.last_compared = None;
        self.no_signal_streak = 0;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut track) = self.track.take() {
            track.release();
        }
    }

    fn is_running(&self) -> bool {
        self.track.is_some()
    }

    fn poll(&mut self, now: DateTime<Utc>, emit: Emit<'_>) -> Result<(), CollectorError> {
        if self.track.is_none() || !self.compare_due(now) {
            return Ok(());
        }
        let Some(reference) = self.reference.as_ref() else {
            return Ok(());
        };
        self.last_compared = Some(now);

        let similarity = match self.embedder.embed_frame()? {
            Some(frame) => cosine_similarity(reference, &frame),
            None => 0.0,
        };
        self.last_similarity = Some(similarity);

        if similarity == 0.0 {
            self.no_signal_streak += 1;
            if self.no_signal_streak == NO_SIGNAL_WARN_AFTER {
                tracing::warn!(
                    streak = self.no_signal_streak,
                    "identity check has produced no signal repeatedly; camera or model may be unavailable"
                );
            }
            return Ok(());
        }
        self.no_signal_streak = 0;

        if similarity > 0.0 && similarity < self.config.match_threshold {
            emit(Detection::new(ViolationType::UserMismatch, now).with_metadata(json!({
                "similarity": similarity,
            })));
        }
        Ok(())
    }
}
