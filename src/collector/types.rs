//! Violation and detection types shared by every collector.
//!
//! A `Detection` is what a collector emits; a `ViolationEvent` is what the
//! throttler produces once it admits a detection for a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of integrity violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    TabSwitch,
    FullscreenExit,
    FocusLost,
    AudioDetected,
    NoFace,
    MultipleFaces,
    LookingAway,
    UserMismatch,
    LivenessFailure,
}

impl ViolationType {
    pub const ALL: [ViolationType; 9] = [
        ViolationType::TabSwitch,
        ViolationType::FullscreenExit,
        ViolationType::FocusLost,
        ViolationType::AudioDetected,
        ViolationType::NoFace,
        ViolationType::MultipleFaces,
        ViolationType::LookingAway,
        ViolationType::UserMismatch,
        ViolationType::LivenessFailure,
    ];

    /// Wire name, e.g. `TAB_SWITCH`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::TabSwitch => "TAB_SWITCH",
            ViolationType::FullscreenExit => "FULLSCREEN_EXIT",
            ViolationType::FocusLost => "FOCUS_LOST",
            ViolationType::AudioDetected => "AUDIO_DETECTED",
            ViolationType::NoFace => "NO_FACE",
            ViolationType::MultipleFaces => "MULTIPLE_FACES",
            ViolationType::LookingAway => "LOOKING_AWAY",
            ViolationType::UserMismatch => "USER_MISMATCH",
            ViolationType::LivenessFailure => "LIVENESS_FAILURE",
        }
    }

    /// Message shown in the candidate's session log.
    pub fn message(&self) -> &'static str {
        match self {
            ViolationType::TabSwitch => "Tab switching detected!",
            ViolationType::FullscreenExit => "Full-screen exited!",
            ViolationType::FocusLost => "Window focus lost!",
            ViolationType::AudioDetected => "Audio detected!",
            ViolationType::NoFace => "No face detected!",
            ViolationType::MultipleFaces => "Multiple people detected!",
            ViolationType::LookingAway => "Looking away from screen",
            ViolationType::UserMismatch => "User identity mismatch!",
            ViolationType::LivenessFailure => "Liveness check failed (No blink detected)!",
        }
    }

    /// Whether this violation comes from the camera's face analysis.
    pub fn is_face_presence(&self) -> bool {
        matches!(
            self,
            ViolationType::NoFace | ViolationType::MultipleFaces | ViolationType::LookingAway
        )
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViolationType::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown violation type '{s}'"))
    }
}

/// Violation severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .iter()
            .copied()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown severity '{s}'"))
    }
}

/// Where the candidate appears to be looking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GazeDirection {
    #[default]
    Center,
    Left,
    Right,
    Up,
    Down,
}

/// A raw detection emitted by a collector, before throttling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub kind: ViolationType,
    pub detected_at: DateTime<Utc>,
    /// Collector-specific context (gaze direction, similarity, audio level)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Detection {
    pub fn new(kind: ViolationType, detected_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            detected_at,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An admitted, immutable violation belonging to one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: ViolationType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ViolationEvent {
    /// Build an event with a fresh identifier.
    pub fn new(
        session_id: impl Into<String>,
        kind: ViolationType,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            kind,
            severity,
            timestamp,
            metadata: None,
        }
    }
}

/// Host-side transitions pushed into the detection pipeline as messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum HostSignal {
    VisibilityChanged { hidden: bool },
    WindowBlurred,
    WindowFocused,
    FullscreenChanged { active: bool },
    ScreenShareEnded,
}
