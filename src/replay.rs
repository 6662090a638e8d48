//! Offline replay of recorded face frames.
//!
//! Feeds a JSONL recording through the classifier, gaze collector, throttler
//! and scoring with a virtual clock, so thresholds can be checked against
//! labelled ground truth before they are deployed.
//!
//! Each line is one frame:
//!
//! ```json
//! {"offset_ms": 33, "frame": {"faceLandmarks": [...], "faceBlendshapes": [...]}, "looking_away": false}
//! ```
//!
//! `looking_away` is optional ground truth.

use crate::classifier::classify;
use crate::clock::{Clock, ManualClock};
use crate::collector::types::{HostSignal, ViolationType};
use crate::collector::{GazeCollector, VisibilityCollector};
use crate::config::Config;
use crate::error::ReplayError;
use crate::monitor::SessionMonitor;
use crate::scoring::CredibilityScore;
use crate::scripted::ScriptedLandmarker;
use crate::sensor::FaceFrame;
use crate::session::SessionRegistry;
use crate::sink::MemoryStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

/// One recorded frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedFrame {
    /// Milliseconds since the start of the recording
    pub offset_ms: i64,
    pub frame: FaceFrame,
    /// Host transitions observed just before this frame
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<HostSignal>,
    /// Ground-truth label, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looking_away: Option<bool>,
}

/// Agreement between classifier output and labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelAgreement {
    pub labelled: usize,
    pub agreed: usize,
    /// Flagged as away while labelled attentive
    pub false_positives: usize,
    /// Labelled away but not flagged
    pub false_negatives: usize,
}

impl LabelAgreement {
    pub fn accuracy(&self) -> Option<f64> {
        (self.labelled > 0).then(|| self.agreed as f64 / self.labelled as f64)
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub frames: usize,
    /// Frames the classifier marked as looking away (including no/multiple faces)
    pub frames_away: usize,
    pub labels: LabelAgreement,
    pub violations: BTreeMap<ViolationType, usize>,
    pub throttled: u64,
    pub credibility: CredibilityScore,
}

impl std::fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Frames replayed: {}", self.frames)?;
        writeln!(f, "Frames flagged away: {}", self.frames_away)?;
        if let Some(accuracy) = self.labels.accuracy() {
            writeln!(
                f,
                "Label agreement: {:.1}% ({} labelled, {} false positives, {} false negatives)",
                accuracy * 100.0,
                self.labels.labelled,
                self.labels.false_positives,
                self.labels.false_negatives
            )?;
        }
        writeln!(f, "Detections throttled: {}", self.throttled)?;
        writeln!(f, "Violations:")?;
        if self.violations.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (kind, count) in &self.violations {
            writeln!(f, "  {kind}: {count}")?;
        }
        write!(
            f,
            "Credibility: {}/{} ({})",
            self.credibility.score,
            self.credibility.base_score,
            self.credibility.rating()
        )
    }
}

/// Read a recording. Blank lines are skipped; malformed lines and offsets
/// that cannot be placed on the replay clock are errors.
pub fn read_recording(path: &Path) -> Result<Vec<RecordedFrame>, ReplayError> {
    let file = std::fs::File::open(path)?;
    let origin = replay_origin();
    let mut frames = Vec::new();
    for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: RecordedFrame =
            serde_json::from_str(&line).map_err(|e| ReplayError::InvalidLine {
                line: number + 1,
                message: e.to_string(),
            })?;
        if frame_time(origin, frame.offset_ms).is_none() {
            return Err(ReplayError::InvalidLine {
                line: number + 1,
                message: format!("offset_ms {} is negative or out of range", frame.offset_ms),
            });
        }
        frames.push(frame);
    }
    Ok(frames)
}

/// Fixed origin so replays are reproducible.
fn replay_origin() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Clock time of a frame, or `None` for negative or unrepresentable offsets.
fn frame_time(origin: DateTime<Utc>, offset_ms: i64) -> Option<DateTime<Utc>> {
    if offset_ms < 0 {
        return None;
    }
    Duration::try_milliseconds(offset_ms).and_then(|offset| origin.checked_add_signed(offset))
}

/// Replay frames through the detection pipeline.
pub fn replay(frames: &[RecordedFrame], config: &Config) -> Result<ReplayReport, ReplayError> {
    let origin = replay_origin();
    let times = frames
        .iter()
        .enumerate()
        .map(|(index, recorded)| {
            frame_time(origin, recorded.offset_ms).ok_or(ReplayError::OffsetOutOfRange {
                index,
                offset_ms: recorded.offset_ms,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let clock = ManualClock::new(origin);

    let registry = Arc::new(SessionRegistry::new());
    let session = registry.create("replay", "replay", origin)?;

    let landmarker = ScriptedLandmarker::new(frames.iter().map(|f| f.frame.clone()));
    let mut monitor = SessionMonitor::new(
        session.id.clone(),
        config,
        Arc::new(MemoryStore::new()),
        registry,
    )
    .with_clock(Arc::new(clock.clone()))
    .with_collector(Box::new(GazeCollector::new(Box::new(landmarker), config)))
    .with_collector(Box::new(VisibilityCollector::new()));
    monitor.start()?;

    let mut frames_away = 0;
    let mut labels = LabelAgreement::default();
    let mut violations: BTreeMap<ViolationType, usize> = BTreeMap::new();

    for (recorded, &at) in frames.iter().zip(&times) {
        clock.set(at);
        for signal in &recorded.signals {
            monitor.push_signal(*signal);
        }

        let state = classify(&recorded.frame, &config.gaze);
        if state.is_looking_away {
            frames_away += 1;
        }
        if let Some(expected) = recorded.looking_away {
            labels.labelled += 1;
            match (state.is_looking_away, expected) {
                (a, b) if a == b => labels.agreed += 1,
                (true, false) => labels.false_positives += 1,
                _ => labels.false_negatives += 1,
            }
        }

        for event in monitor.tick() {
            *violations.entry(event.kind).or_insert(0) += 1;
        }
    }

    let throttled = monitor.audit().throttled;
    let credibility = monitor.complete()?;
    tracing::debug!(elapsed = ?(clock.now() - origin), "replay finished");

    Ok(ReplayReport {
        frames: frames.len(),
        frames_away,
        labels,
        violations,
        throttled,
        credibility,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::face;

    fn recorded(offset_ms: i64, frame: FaceFrame, looking_away: Option<bool>) -> RecordedFrame {
        RecordedFrame {
            offset_ms,
            frame,
            signals: Vec::new(),
            looking_away,
        }
    }

    #[test]
    fn test_replay_counts_throttled_violations() {
        // Three seconds of an empty seat at 10 fps
        let frames: Vec<_> = (0..30)
            .map(|i| recorded(i * 100, FaceFrame::default(), Some(true)))
            .collect();
        let report = replay(&frames, &Config::default()).unwrap();

        assert_eq!(report.frames, 30);
        assert_eq!(report.frames_away, 30);
        assert_eq!(report.violations[&ViolationType::NoFace], 2);
        assert_eq!(report.throttled, 28);
        assert_eq!(report.labels.accuracy(), Some(1.0));
        assert_eq!(report.credibility.score, 80);
    }

    #[test]
    fn test_label_disagreement() {
        let frames = vec![
            recorded(0, face(0.0, &[]), Some(true)),
            recorded(100, face(0.6, &[]), Some(false)),
            recorded(200, face(0.0, &[]), Some(false)),
        ];
        let report = replay(&frames, &Config::default()).unwrap();
        assert_eq!(report.labels.labelled, 3);
        assert_eq!(report.labels.agreed, 1);
        assert_eq!(report.labels.false_negatives, 1);
        assert_eq!(report.labels.false_positives, 1);
    }

    #[test]
    fn test_signals_are_replayed() {
        let mut frame = recorded(0, face(0.0, &[]), None);
        frame.signals = vec![HostSignal::FullscreenChanged { active: false }];
        let report = replay(&[frame], &Config::default()).unwrap();
        assert_eq!(report.violations[&ViolationType::FullscreenExit], 1);
        assert!(report.to_string().contains("FULLSCREEN_EXIT: 1"));
    }

    #[test]
    fn test_out_of_range_offset_is_an_error() {
        let frames = vec![
            recorded(0, face(0.0, &[]), None),
            recorded(i64::MAX, face(0.0, &[]), None),
        ];
        assert!(matches!(
            replay(&frames, &Config::default()),
            Err(ReplayError::OffsetOutOfRange { index: 1, .. })
        ));

        let negative = vec![recorded(-5, face(0.0, &[]), None)];
        assert!(matches!(
            replay(&negative, &Config::default()),
            Err(ReplayError::OffsetOutOfRange { index: 0, .. })
        ));
    }

    #[test]
    fn test_read_recording_reports_line_numbers() {
        let dir = std::env::temp_dir().join(format!("exam-integrity-replay-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frames.jsonl");
        let lines = format!(
            "{}\n\n{}\n",
            r#"{"offset_ms": 0, "frame": {"faceLandmarks": []}}"#,
            format!(r#"{{"offset_ms": {}, "frame": {{"faceLandmarks": []}}}}"#, i64::MAX)
        );
        std::fs::write(&path, lines).unwrap();

        let err = read_recording(&path).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidLine { line: 3, .. }));
        assert!(err.to_string().starts_with("line 3:"));

        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(matches!(
            read_recording(&path),
            Err(ReplayError::InvalidLine { line: 1, .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_recording_line_format() {
        let line = r#"{"offset_ms": 33, "frame": {"faceLandmarks": []}, "looking_away": true}"#;
        let frame: RecordedFrame = serde_json::from_str(line).unwrap();
        assert_eq!(frame.offset_ms, 33);
        assert_eq!(frame.frame.face_count(), 0);
        assert_eq!(frame.looking_away, Some(true));
    }
}
