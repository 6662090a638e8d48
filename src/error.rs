//! Error types for the exam integrity agent.
//!
//! Errors are grouped by concern. None of them is allowed to stop an exam:
//! collectors degrade to "no detection", sink writes are retried once and then
//! logged, and only a failed final submission is surfaced to the caller.

use thiserror::Error;

/// Which physical or logical sensor a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Camera,
    Microphone,
    Screen,
    Embedder,
    Page,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SensorKind::Camera => "camera",
            SensorKind::Microphone => "microphone",
            SensorKind::Screen => "screen",
            SensorKind::Embedder => "embedder",
            SensorKind::Page => "page",
        };
        f.write_str(name)
    }
}

/// Failures reported by sensor implementations.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Permission denied for {0}")]
    PermissionDenied(SensorKind),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("No reference photo on file")]
    MissingReference,

    #[error("Sensor failure: {0}")]
    Failed(String),
}

/// Errors raised by signal collectors.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("{kind} unavailable: {source}")]
    SensorUnavailable {
        kind: SensorKind,
        #[source]
        source: SensorError,
    },

    #[error("Collector is already running")]
    AlreadyRunning,

    #[error("Collector is not running")]
    NotRunning,

    #[error("Sampling failed: {0}")]
    Sampling(#[from] SensorError),
}

/// Errors raised by violation and session stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the session lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Session {0} is already completed")]
    AlreadyCompleted(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session {0} has no pending submission")]
    NothingToSubmit(String),

    #[error("Looking up session {session_id} failed: {source}")]
    LookupFailed {
        session_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Submitting session {session_id} failed: {source}")]
    SubmitFailed {
        session_id: String,
        #[source]
        source: StoreError,
    },
}

/// Errors raised while reading or replaying a recording.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    InvalidLine { line: usize, message: String },

    #[error("frame {index}: offset {offset_ms} ms is negative or out of range")]
    OffsetOutOfRange { index: usize, offset_ms: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
