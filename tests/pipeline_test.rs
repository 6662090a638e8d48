//! End-to-end tests for the monitoring pipeline with scripted sensors

use chrono::{DateTime, TimeZone, Utc};
use exam_integrity_agent::collector::{
    AudioLevelCollector, Collector, DirectoryUploader, GazeCollector, IdentityVerifier,
    ScreenPresenceCollector, VisibilityCollector,
};
use exam_integrity_agent::scripted::{
    ScriptedAudio, ScriptedEmbedder, ScriptedLandmarker, ScriptedScreen, TrackLedger,
};
use exam_integrity_agent::sensor::{BlendshapeCategory, FaceFrame, Point3D};
use exam_integrity_agent::{
    Config, CredibilityRating, HostSignal, JsonlStore, ManualClock, MonitorPhase, SessionMonitor,
    SessionRegistry, SessionStatus, ViolationType,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("exam-integrity-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

/// Single blinking face; `nose_offset` turns the head (0.6 is clearly away).
fn face(nose_offset: f64) -> FaceFrame {
    let mut landmarks = vec![Point3D::default(); 468];
    landmarks[234] = Point3D { x: 0.3, y: 0.5, z: 0.0 };
    landmarks[454] = Point3D { x: 0.7, y: 0.5, z: 0.0 };
    landmarks[1] = Point3D {
        x: 0.5 + nose_offset * 0.4,
        y: 0.5,
        z: 0.0,
    };
    let blink = |name: &str| BlendshapeCategory {
        category_name: name.to_string(),
        score: 0.9,
    };
    FaceFrame {
        face_landmarks: vec![landmarks],
        face_blendshapes: vec![vec![blink("eyeBlinkLeft"), blink("eyeBlinkRight")]],
    }
}

#[test]
fn test_full_session_records_scores_and_releases_sensors() {
    let dir = temp_dir("pipeline");
    let config = Config {
        data_path: dir.clone(),
        ..Config::default()
    };
    let clock = ManualClock::new(origin());
    let ledger = TrackLedger::new();

    let registry = Arc::new(SessionRegistry::new());
    let session = registry.create("exam-42", "candidate-7", origin()).unwrap();
    let store = Arc::new(JsonlStore::new(dir.join("violations.jsonl")));

    // 12 seconds at 10 fps; the candidate turns away from 5.0s to 5.9s.
    let frames = (0..=120).map(|i| if (50..60).contains(&i) { face(0.6) } else { face(0.0) });
    let landmarker = ScriptedLandmarker::new(frames).with_ledger(ledger.clone());

    let audio = ScriptedAudio::new(0).with_ledger(ledger.clone());
    let level = audio.level_handle();

    // Compared at 0s (no face), 5s (someone else) and 10s (the candidate).
    let embedder = ScriptedEmbedder::new(Some(vec![1.0, 0.0]))
        .with_frames(vec![None, Some(vec![0.2, 1.0]), Some(vec![1.0, 0.0])])
        .with_ledger(ledger.clone());

    let screen = ScriptedScreen::new().with_ledger(ledger.clone());
    let controls = screen.controls();

    let mut monitor = SessionMonitor::new(session.id.clone(), &config, store.clone(), registry.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_collector(Box::new(GazeCollector::new(Box::new(landmarker), &config)))
        .with_collector(Box::new(AudioLevelCollector::new(Box::new(audio), &config)))
        .with_collector(Box::new(IdentityVerifier::new(Box::new(embedder), &config)))
        .with_collector(Box::new(
            ScreenPresenceCollector::new(Box::new(screen), &config)
                .with_uploader(Box::new(DirectoryUploader::for_session(&dir, &session.id))),
        ))
        .with_collector(Box::new(VisibilityCollector::new()));

    monitor.start().unwrap();
    assert!(monitor.warnings().is_empty());
    assert_eq!(ledger.opened(), 4);

    for i in 0..=120 {
        match i {
            10 => monitor.push_signal(HostSignal::VisibilityChanged { hidden: true }),
            11 => monitor.push_signal(HostSignal::VisibilityChanged { hidden: false }),
            80 => monitor.push_signal(HostSignal::WindowBlurred),
            81 => monitor.push_signal(HostSignal::WindowFocused),
            _ => {}
        }
        let loud = (20..30).contains(&i);
        level.store(if loud { 200 } else { 0 }, Ordering::SeqCst);

        monitor.tick();
        clock.advance_millis(100);
    }

    let kinds: Vec<_> = monitor.violations().iter().map(|v| v.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ViolationType::TabSwitch,
            ViolationType::AudioDetected,
            ViolationType::LookingAway,
            ViolationType::UserMismatch,
            ViolationType::FocusLost,
        ]
    );
    assert_eq!(controls.captures(), 3);

    let score = monitor.complete().unwrap();
    assert_eq!(monitor.phase(), MonitorPhase::Completed);
    // 100 - 3 critical (30) - 1 high (7) - 1 medium (3)
    assert_eq!(score.score, 60);
    assert_eq!(score.total_violations, 5);
    assert_eq!(score.rating(), CredibilityRating::Fair);

    assert_eq!(ledger.outstanding(), 0);

    let stored = store.read_all().unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|v| v.session_id == session.id));
    assert_eq!(monitor.stored_violations().len(), 5);
    assert_eq!(monitor.sink_stats().written, 5);

    let recorded = registry.get(&session.id).unwrap();
    assert_eq!(recorded.status, SessionStatus::Completed);
    assert!(recorded.ended_at.is_some());

    let snapshots = dir.join("snapshots").join(&session.id);
    assert!(snapshots.join("latest.jpg").exists());
    let taken = std::fs::read_dir(&snapshots)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("screen_"))
        .count();
    assert_eq!(taken, 3);

    // Ticks after completion are ignored and the score stays frozen.
    monitor.push_signal(HostSignal::VisibilityChanged { hidden: true });
    assert!(monitor.tick().is_empty());
    assert_eq!(monitor.score(), score);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_degraded_sensors_keep_the_exam_running() {
    let config = Config::default();
    let clock = ManualClock::new(origin());
    let ledger = TrackLedger::new();

    let registry = Arc::new(SessionRegistry::new());
    let session = registry.create("exam-42", "candidate-8", origin()).unwrap();
    let store = Arc::new(exam_integrity_agent::MemoryStore::new());

    let screen = ScriptedScreen::new().with_ledger(ledger.clone());
    let controls = screen.controls();

    let mut monitor = SessionMonitor::new(session.id.clone(), &config, store, registry.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_collector(Box::new(GazeCollector::new(
            Box::new(ScriptedLandmarker::denied()),
            &config,
        )))
        .with_collector(Box::new(AudioLevelCollector::new(
            Box::new(ScriptedAudio::new(0).with_ledger(ledger.clone())),
            &config,
        )))
        .with_collector(Box::new(ScreenPresenceCollector::new(Box::new(screen), &config)))
        .with_collector(Box::new(VisibilityCollector::new()));

    monitor.start().unwrap();
    let warnings = monitor.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("camera"));

    for i in 0..=60 {
        match i {
            // The candidate stops sharing and refuses the prompt for a while.
            5 => {
                controls.set_denied(true);
                controls.end_share();
            }
            25 => controls.set_denied(false),
            40 => monitor.push_signal(HostSignal::FullscreenChanged { active: false }),
            _ => {}
        }
        monitor.tick();
        if i == 15 {
            assert!(monitor
                .warnings()
                .iter()
                .any(|w| w.contains("Screen sharing is required")));
        }
        clock.advance_millis(100);
    }

    assert!(controls.is_live());
    assert!(!monitor
        .warnings()
        .iter()
        .any(|w| w.contains("Screen sharing")));

    let exits: Vec<_> = monitor
        .violations()
        .iter()
        .filter(|v| v.kind == ViolationType::FullscreenExit)
        .collect();
    assert_eq!(exits.len(), 2);
    assert_eq!(exits[0].metadata.as_ref().unwrap()["source"], "screen_share");

    let score = monitor.complete().unwrap();
    assert_eq!(score.score, 80);
    // Screen opened twice, microphone once; the camera never opened.
    assert_eq!(ledger.opened(), 3);
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn test_missing_reference_photo_disables_identity_only() {
    let config = Config::default();
    let clock = ManualClock::new(origin());
    let registry = Arc::new(SessionRegistry::new());
    let session = registry.create("exam-1", "candidate-9", origin()).unwrap();

    let mut monitor = SessionMonitor::new(
        session.id.clone(),
        &config,
        Arc::new(exam_integrity_agent::MemoryStore::new()),
        registry,
    )
    .with_clock(Arc::new(clock.clone()))
    .with_collector(Box::new(IdentityVerifier::new(
        Box::new(ScriptedEmbedder::new(None)),
        &config,
    )))
    .with_collector(Box::new(VisibilityCollector::new()));

    monitor.start().unwrap();
    assert_eq!(monitor.warnings().len(), 1);
    assert!(!monitor.collector("identity").unwrap().is_running());

    monitor.push_signal(HostSignal::VisibilityChanged { hidden: true });
    let admitted = monitor.tick();
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].kind, ViolationType::TabSwitch);

    clock.advance_millis(1000);
    assert_eq!(monitor.complete().unwrap().score, 90);
}
