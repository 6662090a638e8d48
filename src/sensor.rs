//! Sensor-facing interfaces.
//!
//! Collectors never talk to hardware directly. A host (browser bridge, native
//! capture layer, or a test double) implements these traits. Every opened
//! media resource is returned as a [`TrackGuard`], which stops the underlying
//! track when dropped.

use crate::error::{SensorError, SensorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized facial landmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// One blendshape coefficient from the face model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendshapeCategory {
    pub category_name: String,
    pub score: f64,
}

/// Face-detection result for one video frame.
///
/// `face_landmarks[i]` and `face_blendshapes[i]` describe the same face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceFrame {
    pub face_landmarks: Vec<Vec<Point3D>>,
    #[serde(default)]
    pub face_blendshapes: Vec<Vec<BlendshapeCategory>>,
}

impl FaceFrame {
    pub fn face_count(&self) -> usize {
        self.face_landmarks.len()
    }
}

/// Feature vector produced by the face embedder.
pub type Embedding = Vec<f32>;

/// A live media track (camera, microphone or screen capture).
pub trait MediaTrack: Send {
    fn kind(&self) -> SensorKind;

    /// Whether the track is still delivering data.
    fn is_live(&self) -> bool;

    /// Stop the track and release the device. Must be idempotent.
    fn stop(&mut self);
}

/// Owns a media track and stops it on drop.
pub struct TrackGuard {
    track: Option<Box<dyn MediaTrack>>,
}

impl TrackGuard {
    pub fn new(track: Box<dyn MediaTrack>) -> Self {
        Self { track: Some(track) }
    }

    /// A guard for sensors that hold no releasable device.
    pub fn detached() -> Self {
        Self { track: None }
    }

    pub fn is_live(&self) -> bool {
        self.track.as_ref().map(|t| t.is_live()).unwrap_or(true)
    }

    /// Stop the track now rather than at drop time.
    pub fn release(&mut self) {
        if let Some(mut track) = self.track.take() {
            tracing::debug!(kind = %track.kind(), "releasing media track");
            track.stop();
        }
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TrackGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackGuard")
            .field("kind", &self.track.as_ref().map(|t| t.kind()))
            .finish()
    }
}

/// Camera plus face-landmark model.
pub trait FaceLandmarker: Send {
    fn open(&mut self) -> Result<TrackGuard, SensorError>;

    /// Run detection on the current frame. `None` means no frame was ready.
    fn detect(&mut self, at: DateTime<Utc>) -> Result<Option<FaceFrame>, SensorError>;
}

/// Microphone plus frequency analyser.
pub trait AudioAnalyser: Send {
    fn open(&mut self) -> Result<TrackGuard, SensorError>;

    /// Byte frequency data (0-255 per bin) for the current sample.
    fn frequency_data(&mut self) -> Result<Vec<u8>, SensorError>;
}

/// Image embedder used for identity verification.
pub trait FaceEmbedder: Send {
    fn open(&mut self) -> Result<TrackGuard, SensorError>;

    /// Embed the stored reference photo. `None` when the model produced nothing.
    fn embed_reference(&mut self) -> Result<Option<Embedding>, SensorError>;

    /// Embed the current camera frame. `None` when no frame or no embedding.
    fn embed_frame(&mut self) -> Result<Option<Embedding>, SensorError>;
}

/// Mandatory screen-sharing stream.
pub trait ScreenShare: Send {
    /// Prompt the candidate to share their screen.
    fn open(&mut self) -> Result<TrackGuard, SensorError>;

    /// Capture the current screen as JPEG bytes.
    fn capture(&mut self) -> Result<Option<Vec<u8>>, SensorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTrack {
        stops: Arc<AtomicUsize>,
    }

    impl MediaTrack for CountingTrack {
        fn kind(&self) -> SensorKind {
            SensorKind::Camera
        }

        fn is_live(&self) -> bool {
            true
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_guard_stops_track_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut guard = TrackGuard::new(Box::new(CountingTrack {
            stops: stops.clone(),
        }));
        guard.release();
        drop(guard);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_stops_track_on_drop() {
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let _guard = TrackGuard::new(Box::new(CountingTrack {
                stops: stops.clone(),
            }));
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_face_frame_wire_shape() {
        let json = r#"{
            "faceLandmarks": [[{"x": 0.5, "y": 0.5, "z": 0.0}]],
            "faceBlendshapes": [[{"categoryName": "eyeBlinkLeft", "score": 0.9}]]
        }"#;
        let frame: FaceFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.face_count(), 1);
        assert_eq!(frame.face_blendshapes[0][0].category_name, "eyeBlinkLeft");
    }
}
