//! Gaze collector: classifies every rendered frame and derives liveness.

use crate::classifier::{classify, GazeState};
use crate::collector::liveness::LivenessMonitor;
use crate::collector::types::{Detection, ViolationType};
use crate::collector::{Collector, Emit};
use crate::config::{Config, GazeThresholds};
use crate::error::{CollectorError, SensorKind};
use crate::scheduler::Cadence;
use crate::sensor::{FaceLandmarker, TrackGuard};
use chrono::{DateTime, Utc};
use serde_json::json;

pub struct GazeCollector {
    landmarker: Box<dyn FaceLandmarker>,
    thresholds: GazeThresholds,
    liveness: LivenessMonitor,
    track: Option<TrackGuard>,
    last_state: Option<GazeState>,
    frames: u64,
}

impl GazeCollector {
    pub fn new(landmarker: Box<dyn FaceLandmarker>, config: &Config) -> Self {
        Self {
            landmarker,
            thresholds: config.gaze,
            liveness: LivenessMonitor::new(config.liveness_timeout),
            track: None,
            last_state: None,
            frames: 0,
        }
    }

    /// Classification of the most recent frame.
    pub fn last_state(&self) -> Option<&GazeState> {
        self.last_state.as_ref()
    }

    /// Frames classified since the collector was created.
    pub fn frames_processed(&self) -> u64 {
        self.frames
    }
}

/// At most one face-presence violation per frame: no-face > multiple > away.
fn face_violation(state: &GazeState) -> Option<ViolationType> {
    if state.is_no_face {
        Some(ViolationType::NoFace)
    } else if state.is_multiple_faces {
        Some(ViolationType::MultipleFaces)
    } else if state.is_looking_away {
        Some(ViolationType::LookingAway)
    } else {
        None
    }
}

impl Collector for GazeCollector {
    fn name(&self) -> &'static str {
        "gaze"
    }

    fn sensor(&self) -> SensorKind {
        SensorKind::Camera
    }

    fn cadence(&self) -> Cadence {
        Cadence::EveryFrame
    }

    fn start(&mut self, now: DateTime<Utc>) -> Result<(), CollectorError> {
        if self.track.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        let track = self
            .landmarker
            .open()
            .map_err(|source| CollectorError::SensorUnavailable {
                kind: SensorKind::Camera,
                source,
            })?;
        self.track = Some(track);
        self.liveness.rearm(now);
        self.last_state = None;
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
        if self.track.is_none() {
            return Ok(());
        }
        let Some(frame) = self.landmarker.detect(now)? else {
            return Ok(());
        };

        let state = classify(&frame, &self.thresholds);
        self.frames += 1;

        if let Some(kind) = face_violation(&state) {
            emit(Detection::new(kind, now).with_metadata(json!({
                "face_count": state.face_count,
                "gaze_direction": state.gaze_direction,
                "head_yaw": state.head_yaw,
                "eye_gaze": state.eye_gaze,
            })));
        }

        // Blinks can only be judged on exactly one visible face.
        if state.face_count == 1 {
            if self.liveness.observe(state.is_blinking, now) {
                emit(Detection::new(ViolationType::LivenessFailure, now));
            }
        } else {
            self.liveness.rearm(now);
        }

        self.last_state = Some(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::face;
    use crate::scripted::{ScriptedLandmarker, TrackLedger};
    use crate::sensor::FaceFrame;
    use chrono::Duration;

    fn run(collector: &mut GazeCollector, now: DateTime<Utc>) -> Vec<Detection> {
        let mut out = Vec::new();
        collector.poll(now, &mut |d| out.push(d)).unwrap();
        out
    }

    #[test]
    fn test_emits_face_violations_by_precedence() {
        let mut two_faces = face(0.0, &[]);
        two_faces.face_landmarks.push(two_faces.face_landmarks[0].clone());
        let frames = vec![FaceFrame::default(), two_faces, face(0.6, &[]), face(0.0, &[])];
        let mut collector =
            GazeCollector::new(Box::new(ScriptedLandmarker::new(frames)), &Config::default());
        let now = Utc::now();
        collector.start(now).unwrap();

        let kinds: Vec<_> = (0..4)
            .flat_map(|_| run(&mut collector, now))
            .map(|d| d.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ViolationType::NoFace,
                ViolationType::MultipleFaces,
                ViolationType::LookingAway
            ]
        );
        assert_eq!(collector.frames_processed(), 4);
    }

    #[test]
    fn test_missing_frame_is_skipped() {
        let mut collector =
            GazeCollector::new(Box::new(ScriptedLandmarker::new(vec![])), &Config::default());
        collector.start(Utc::now()).unwrap();
        assert!(run(&mut collector, Utc::now()).is_empty());
        assert_eq!(collector.frames_processed(), 0);
    }

    #[test]
    fn test_liveness_failure_without_blinks() {
        let landmarker = ScriptedLandmarker::new(vec![face(0.0, &[])]).repeating();
        let mut collector = GazeCollector::new(Box::new(landmarker), &Config::default());
        let start = Utc::now();
        collector.start(start).unwrap();

        assert!(run(&mut collector, start + Duration::seconds(30)).is_empty());
        let detections = run(&mut collector, start + Duration::seconds(61));
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].kind, ViolationType::LivenessFailure);
        assert!(run(&mut collector, start + Duration::seconds(62)).is_empty());
    }

    #[test]
    fn test_blinking_face_stays_live() {
        let blink = face(0.0, &[("eyeBlinkLeft", 0.9), ("eyeBlinkRight", 0.9)]);
        let landmarker = ScriptedLandmarker::new(vec![blink]).repeating();
        let mut collector = GazeCollector::new(Box::new(landmarker), &Config::default());
        let start = Utc::now();
        collector.start(start).unwrap();

        for secs in [30, 61, 90, 150] {
            assert!(run(&mut collector, start + Duration::seconds(secs)).is_empty());
        }
    }

    #[test]
    fn test_stop_releases_camera() {
        let ledger = TrackLedger::new();
        let landmarker = ScriptedLandmarker::new(vec![]).with_ledger(ledger.clone());
        let mut collector = GazeCollector::new(Box::new(landmarker), &Config::default());
        collector.start(Utc::now()).unwrap();
        assert!(matches!(
            collector.start(Utc::now()),
            Err(CollectorError::AlreadyRunning)
        ));
        assert_eq!(ledger.outstanding(), 1);
        collector.stop();
        collector.stop();
        assert_eq!(ledger.outstanding(), 0);
        assert!(!collector.is_running());
    }

    #[test]
    fn test_denied_camera_is_unavailable() {
        let mut collector =
            GazeCollector::new(Box::new(ScriptedLandmarker::denied()), &Config::default());
        let err = collector.start(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CollectorError::SensorUnavailable {
                kind: SensorKind::Camera,
                ..
            }
        ));
        assert!(!collector.is_running());
    }
}
