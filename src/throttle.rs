//! Violation throttler.
//!
//! Sensors run at 30-60 Hz; reviewers can read a handful of alerts a minute.
//! The throttler keeps one cooldown per `(session, bucket)` and silently drops
//! any detection that arrives inside its window. Admitted detections become
//! `ViolationEvent`s; this is the only place events are created.

use crate::collector::types::{Detection, ViolationEvent, ViolationType};
use crate::config::{Config, CooldownConfig, SeverityMap};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Cooldown key. The three face-presence types share one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownBucket {
    FacePresence,
    Type(ViolationType),
}

impl From<ViolationType> for CooldownBucket {
    fn from(kind: ViolationType) -> Self {
        if kind.is_face_presence() {
            CooldownBucket::FacePresence
        } else {
            CooldownBucket::Type(kind)
        }
    }
}

/// Per-session, per-bucket rate limiter. Safe to share between collectors.
#[derive(Debug)]
pub struct Throttler {
    cooldowns: CooldownConfig,
    severities: SeverityMap,
    last_emitted: Mutex<HashMap<(String, CooldownBucket), DateTime<Utc>>>,
}

impl Throttler {
    pub fn new(cooldowns: CooldownConfig, severities: SeverityMap) -> Self {
        Self {
            cooldowns,
            severities,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cooldowns, config.severity_map.clone())
    }

    /// Decide whether a detection of `kind` at `now` is admitted, and if so
    /// start its cooldown.
    pub fn admit(&self, session_id: &str, kind: ViolationType, now: DateTime<Utc>) -> bool {
        let cooldown = self.cooldowns.for_type(kind);
        if cooldown.is_zero() {
            return true;
        }
        let cooldown = chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);

        let key = (session_id.to_string(), CooldownBucket::from(kind));
        let mut last_emitted = self.last_emitted.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&last) = last_emitted.get(&key) {
            // A clock that went backwards is still inside the window.
            if now - last < cooldown {
                return false;
            }
        }
        last_emitted.insert(key, now);
        true
    }

    /// Admit a detection and build its event, or `None` if it was throttled.
    pub fn admit_detection(&self, session_id: &str, detection: Detection) -> Option<ViolationEvent> {
        if !self.admit(session_id, detection.kind, detection.detected_at) {
            tracing::debug!(session_id, kind = %detection.kind, "detection throttled");
            return None;
        }
        let mut event = ViolationEvent::new(
            session_id,
            detection.kind,
            self.severities.severity_for(detection.kind),
            detection.detected_at,
        );
        event.metadata = detection.metadata;
        Some(event)
    }

    /// Drop all cooldown state for a session.
    pub fn reset_session(&self, session_id: &str) {
        let mut last_emitted = self.last_emitted.lock().unwrap_or_else(|e| e.into_inner());
        last_emitted.retain(|(id, _), _| id != session_id);
    }

    /// Number of live cooldown entries (all sessions).
    pub fn tracked_entries(&self) -> usize {
        self.last_emitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::Severity;
    use chrono::Duration;
    use std::sync::Arc;

    fn throttler() -> Throttler {
        Throttler::from_config(&Config::default())
    }

    #[test]
    fn test_audio_burst_admits_once() {
        let throttler = throttler();
        let start = Utc::now();
        let admitted = (0..10)
            .filter(|i| {
                throttler.admit("s1", ViolationType::AudioDetected, start + Duration::milliseconds(i * 100))
            })
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_cooldown_boundary() {
        let throttler = throttler();
        let start = Utc::now();
        assert!(throttler.admit("s1", ViolationType::AudioDetected, start));
        assert!(!throttler.admit(
            "s1",
            ViolationType::AudioDetected,
            start + Duration::milliseconds(1999)
        ));
        assert!(throttler.admit(
            "s1",
            ViolationType::AudioDetected,
            start + Duration::milliseconds(2000)
        ));
    }

    #[test]
    fn test_edge_triggered_types_are_never_throttled() {
        let throttler = throttler();
        let now = Utc::now();
        for _ in 0..5 {
            assert!(throttler.admit("s1", ViolationType::TabSwitch, now));
            assert!(throttler.admit("s1", ViolationType::FullscreenExit, now));
        }
        assert_eq!(throttler.tracked_entries(), 0);
    }

    #[test]
    fn test_face_presence_types_share_a_bucket() {
        let throttler = throttler();
        let now = Utc::now();
        assert!(throttler.admit("s1", ViolationType::NoFace, now));
        assert!(!throttler.admit("s1", ViolationType::MultipleFaces, now + Duration::milliseconds(500)));
        assert!(!throttler.admit("s1", ViolationType::LookingAway, now + Duration::milliseconds(1500)));
        assert!(throttler.admit("s1", ViolationType::LookingAway, now + Duration::seconds(2)));
        // Other types are independent of the face bucket
        assert!(throttler.admit("s1", ViolationType::AudioDetected, now + Duration::seconds(2)));
    }

    #[test]
    fn test_sessions_are_independent() {
        let throttler = throttler();
        let now = Utc::now();
        assert!(throttler.admit("s1", ViolationType::LivenessFailure, now));
        assert!(throttler.admit("s2", ViolationType::LivenessFailure, now));
        assert!(!throttler.admit("s1", ViolationType::LivenessFailure, now + Duration::seconds(4)));
        assert!(throttler.admit("s1", ViolationType::LivenessFailure, now + Duration::seconds(5)));
    }

    #[test]
    fn test_backwards_clock_is_throttled() {
        let throttler = throttler();
        let now = Utc::now();
        assert!(throttler.admit("s1", ViolationType::AudioDetected, now));
        assert!(!throttler.admit("s1", ViolationType::AudioDetected, now - Duration::seconds(10)));
    }

    #[test]
    fn test_reset_session_clears_only_that_session() {
        let throttler = throttler();
        let now = Utc::now();
        throttler.admit("s1", ViolationType::AudioDetected, now);
        throttler.admit("s2", ViolationType::AudioDetected, now);
        throttler.reset_session("s1");
        assert!(throttler.admit("s1", ViolationType::AudioDetected, now));
        assert!(!throttler.admit("s2", ViolationType::AudioDetected, now));
    }

    #[test]
    fn test_admit_detection_builds_event() {
        let throttler = throttler();
        let now = Utc::now();
        let detection = Detection::new(ViolationType::FocusLost, now)
            .with_metadata(serde_json::json!({"note": "blur"}));
        let event = throttler.admit_detection("s1", detection).unwrap();
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.kind, ViolationType::FocusLost);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.timestamp, now);
        assert!(event.metadata.is_some());
    }

    #[test]
    fn test_admitted_events_respect_cooldown_under_concurrency() {
        let throttler = Arc::new(throttler());
        let start = Utc::now();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let throttler = throttler.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter_map(|i| {
                            let at = start + Duration::milliseconds(i * 50 + worker);
                            throttler
                                .admit("s1", ViolationType::AudioDetected, at)
                                .then_some(at)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut admitted: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        admitted.sort();
        assert!(!admitted.is_empty());
        for pair in admitted.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::seconds(2));
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashMap;

        fn detection() -> impl Strategy<Value = (ViolationType, i64)> {
            (prop::sample::select(ViolationType::ALL.to_vec()), 0i64..20_000)
        }

        proptest! {
            /// Admitted events of one bucket are always a full cooldown apart,
            /// whatever order the detections arrive in.
            #[test]
            fn prop_admitted_events_are_cooldown_apart(
                detections in prop::collection::vec(detection(), 0..200),
            ) {
                let config = Config::default();
                let throttler = Throttler::from_config(&config);
                let start = Utc::now();
                let mut admitted: HashMap<CooldownBucket, Vec<DateTime<Utc>>> = HashMap::new();

                for (kind, offset_ms) in detections {
                    let at = start + Duration::milliseconds(offset_ms);
                    if throttler.admit("s1", kind, at) {
                        admitted.entry(CooldownBucket::from(kind)).or_default().push(at);
                    }
                }

                for (bucket, times) in admitted {
                    let kind = match bucket {
                        CooldownBucket::FacePresence => ViolationType::NoFace,
                        CooldownBucket::Type(kind) => kind,
                    };
                    let cooldown = Duration::from_std(config.cooldowns.for_type(kind)).unwrap();
                    if cooldown.is_zero() {
                        continue;
                    }
                    for pair in times.windows(2) {
                        prop_assert!(pair[1] - pair[0] >= cooldown);
                    }
                }
            }
        }
    }
}
