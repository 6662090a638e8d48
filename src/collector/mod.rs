//! Signal collectors.
//!
//! Each collector wraps one sensor, is started and stopped by the session
//! lifecycle, and reports raw detections through an emission callback. The
//! throttler decides which detections become violations.

pub mod audio;
pub mod gaze;
pub mod identity;
pub mod liveness;
pub mod screen;
pub mod types;
pub mod visibility;

use crate::error::{CollectorError, SensorKind};
use crate::scheduler::Cadence;
use chrono::{DateTime, Utc};

// Re-export commonly used types
pub use audio::AudioLevelCollector;
pub use gaze::GazeCollector;
pub use identity::{cosine_similarity, IdentityVerifier};
pub use liveness::LivenessMonitor;
pub use screen::{BackgroundUploader, DirectoryUploader, ScreenPresenceCollector, SnapshotUploader};
pub use types::{Detection, GazeDirection, HostSignal, Severity, ViolationEvent, ViolationType};
pub use visibility::VisibilityCollector;

/// Emission callback handed to collectors.
pub type Emit<'a> = &'a mut dyn FnMut(Detection);

/// A continuous signal source.
pub trait Collector: Send {
    /// Short name used in logs and warnings.
    fn name(&self) -> &'static str;

    /// The sensor this collector depends on.
    fn sensor(&self) -> SensorKind;

    fn cadence(&self) -> Cadence;

    /// Acquire the sensor. Fails with `SensorUnavailable` when it cannot.
    fn start(&mut self, now: DateTime<Utc>) -> Result<(), CollectorError>;

    /// Release the sensor. Must be idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Sample the sensor once.
    fn poll(&mut self, _now: DateTime<Utc>, _emit: Emit<'_>) -> Result<(), CollectorError> {
        Ok(())
    }

    /// React to a host transition.
    fn on_signal(&mut self, _signal: HostSignal, _now: DateTime<Utc>, _emit: Emit<'_>) {}

    /// A blocking warning the candidate must act on, if any.
    fn warning(&self) -> Option<String> {
        None
    }
}
