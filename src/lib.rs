//! Exam Integrity Agent - multi-signal violation detection for proctored exams.
//!
//! Continuously samples camera, microphone, screen-share and page-visibility
//! signals during an exam session, classifies suspicious behavior, rate-limits
//! the resulting violations and derives a credibility score from them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Session Monitor                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                │
//! │  │ Collectors │──▶│ Throttler  │──▶│    Sink    │──▶ store       │
//! │  │ gaze audio │   │ (cooldown) │   │ (writer)   │                │
//! │  │ id screen  │   └────────────┘   └────────────┘                │
//! │  │ visibility │         │                                        │
//! │  └────────────┘         ▼                                        │
//! │        ▲          ┌────────────┐   ┌────────────┐                │
//! │  host signals     │ Session log│──▶│  Scoring   │                │
//! │                   └────────────┘   └────────────┘                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exam_integrity_agent::{
//!     collector::{AudioLevelCollector, VisibilityCollector},
//!     scripted::ScriptedAudio,
//!     Config, HostSignal, MemoryStore, SessionMonitor, SessionRegistry,
//! };
//!
//! let config = Config::default();
//! let registry = Arc::new(SessionRegistry::new());
//! let session = registry.create("exam-1", "candidate-1", chrono::Utc::now()).unwrap();
//!
//! let mut monitor = SessionMonitor::new(&session.id, &config, Arc::new(MemoryStore::new()), registry)
//!     .with_collector(Box::new(VisibilityCollector::new()))
//!     .with_collector(Box::new(AudioLevelCollector::new(Box::new(ScriptedAudio::new(0)), &config)));
//! monitor.start().unwrap();
//!
//! monitor.push_signal(HostSignal::VisibilityChanged { hidden: true });
//! monitor.tick();
//!
//! let score = monitor.complete().unwrap();
//! println!("credibility: {}", score.score);
//! ```

pub mod audit;
pub mod classifier;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod monitor;
pub mod replay;
pub mod scheduler;
pub mod scoring;
pub mod scripted;
pub mod sensor;
pub mod session;
pub mod sink;
pub mod throttle;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use audit::{AuditLog, AuditStats};
pub use classifier::{classify, GazeState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{
    Collector, Detection, GazeDirection, HostSignal, Severity, ViolationEvent, ViolationType,
};
pub use config::Config;
pub use error::{CollectorError, ConfigError, LifecycleError, ReplayError, SensorError, StoreError};
pub use monitor::{MonitorPhase, SessionMonitor};
pub use scoring::{CredibilityRating, CredibilityScore, ScoringEngine, SeverityHistogram};
pub use session::{Session, SessionRegistry, SessionStatus, SessionSubmitter};
pub use sink::{JsonlStore, MemoryStore, ViolationSink, ViolationStore};
pub use throttle::Throttler;

#[cfg(feature = "remote")]
pub use sink::{BlockingRemoteStore, RemoteConfig, RemoteStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Monitoring notice shown to candidates before an exam starts.
pub const MONITORING_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║             EXAM INTEGRITY AGENT - MONITORING NOTICE             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This exam is proctored. While it is in progress we check:       ║
║                                                                  ║
║  ✓ WHAT WE MONITOR:                                              ║
║    • Whether one face is visible and looking at the screen       ║
║    • Whether you blink (to confirm a live person)                ║
║    • Whether your face matches your reference photo              ║
║    • Sustained sound levels near the microphone                  ║
║    • Tab switches, window focus and full-screen exits            ║
║    • Periodic snapshots of the shared screen                     ║
║                                                                  ║
║  ✗ WHAT WE NEVER KEEP:                                           ║
║    • Camera video or microphone audio                            ║
║    • Face measurements beyond the current frame                  ║
║                                                                  ║
║  Each recorded event lowers a 0-100 credibility score that a     ║
║  human reviewer sees alongside the event list.                   ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
