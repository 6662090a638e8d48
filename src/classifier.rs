//! Frame classifier: one face-detection result in, one gaze state out.
//!
//! Head pose alone over-triggers (candidates turn to read) and eye gaze alone
//! under-triggers (compensating saccades), so the classifier combines both
//! with lenient, asymmetric thresholds.

use crate::collector::types::GazeDirection;
use crate::config::GazeThresholds;
use crate::sensor::{BlendshapeCategory, FaceFrame, Point3D};
use serde::{Deserialize, Serialize};

/// Landmark indices in the 468-point face mesh.
const NOSE_TIP: usize = 1;
const LEFT_CHEEK: usize = 234;
const RIGHT_CHEEK: usize = 454;

/// Attention classification for a single frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeState {
    pub face_count: usize,
    pub is_looking_away: bool,
    pub gaze_direction: GazeDirection,
    pub is_multiple_faces: bool,
    pub is_no_face: bool,
    pub is_blinking: bool,
    /// Normalized head yaw, positive = right. Zero unless exactly one face.
    pub head_yaw: f64,
    /// Averaged horizontal eye gaze, positive = right.
    pub eye_gaze: f64,
}

/// Classify a frame. Pure and deterministic.
pub fn classify(frame: &FaceFrame, thresholds: &GazeThresholds) -> GazeState {
    let face_count = frame.face_count();

    if face_count == 0 {
        return GazeState {
            face_count: 0,
            is_looking_away: true,
            is_no_face: true,
            ..GazeState::default()
        };
    }

    if face_count > 1 {
        return GazeState {
            face_count,
            is_looking_away: true,
            is_multiple_faces: true,
            ..GazeState::default()
        };
    }

    let landmarks = &frame.face_landmarks[0];
    let blendshapes: &[BlendshapeCategory] = frame
        .face_blendshapes
        .first()
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let head_yaw = head_yaw(landmarks, thresholds.yaw_scale);
    let eye_gaze = eye_gaze(blendshapes);

    let (mut is_looking_away, mut gaze_direction) = horizontal_decision(head_yaw, eye_gaze, thresholds);

    if score(blendshapes, "eyeLookUpLeft") > thresholds.look_up {
        is_looking_away = true;
        gaze_direction = GazeDirection::Up;
    } else if score(blendshapes, "eyeLookDownLeft") > thresholds.look_down {
        is_looking_away = true;
        gaze_direction = GazeDirection::Down;
    }

    let is_blinking = score(blendshapes, "eyeBlinkLeft") > thresholds.blink
        && score(blendshapes, "eyeBlinkRight") > thresholds.blink;

    GazeState {
        face_count,
        is_looking_away,
        gaze_direction,
        is_multiple_faces: false,
        is_no_face: false,
        is_blinking,
        head_yaw,
        eye_gaze,
    }
}

/// Ordered horizontal policy; the first matching rule wins.
fn horizontal_decision(
    head_yaw: f64,
    eye_gaze: f64,
    thresholds: &GazeThresholds,
) -> (bool, GazeDirection) {
    let yaw = head_yaw.abs();

    if yaw > thresholds.yaw_extreme {
        return (true, direction_of(head_yaw));
    }

    if yaw > thresholds.yaw_moderate {
        // Eyes pointing back toward the screen compensate for the head turn.
        let agrees = if head_yaw > 0.0 {
            eye_gaze > thresholds.eye_agreement
        } else {
            eye_gaze < -thresholds.eye_agreement
        };
        return if agrees {
            (true, direction_of(head_yaw))
        } else {
            (false, GazeDirection::Center)
        };
    }

    if eye_gaze.abs() > thresholds.eye_gaze {
        return (true, direction_of(eye_gaze));
    }

    (false, GazeDirection::Center)
}

fn direction_of(value: f64) -> GazeDirection {
    if value > 0.0 {
        GazeDirection::Right
    } else {
        GazeDirection::Left
    }
}

/// Nose offset from the cheek midpoint, normalized by face width.
fn head_yaw(landmarks: &[Point3D], scale: f64) -> f64 {
    let (Some(nose), Some(left), Some(right)) = (
        landmarks.get(NOSE_TIP),
        landmarks.get(LEFT_CHEEK),
        landmarks.get(RIGHT_CHEEK),
    ) else {
        return 0.0;
    };

    let face_width = (right.x - left.x).abs();
    if face_width <= f64::EPSILON {
        return 0.0;
    }
    let center_x = (left.x + right.x) / 2.0;
    (nose.x - center_x) / face_width * scale
}

/// Net horizontal eye movement averaged over both eyes.
fn eye_gaze(blendshapes: &[BlendshapeCategory]) -> f64 {
    let left_eye = score(blendshapes, "eyeLookInLeft") - score(blendshapes, "eyeLookOutLeft");
    let right_eye = score(blendshapes, "eyeLookOutRight") - score(blendshapes, "eyeLookInRight");
    (left_eye + right_eye) / 2.0
}

fn score(blendshapes: &[BlendshapeCategory], name: &str) -> f64 {
    blendshapes
        .iter()
        .find(|b| b.category_name == name)
        .map(|b| b.score)
        .unwrap_or(0.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A single-face mesh with the nose offset horizontally by `nose_offset`
    /// (fraction of face width) from the cheek midpoint.
    pub(crate) fn face(nose_offset: f64, shapes: &[(&str, f64)]) -> FaceFrame {
        let mut landmarks = vec![Point3D::default(); 468];
        landmarks[LEFT_CHEEK] = Point3D { x: 0.3, y: 0.5, z: 0.0 };
        landmarks[RIGHT_CHEEK] = Point3D { x: 0.7, y: 0.5, z: 0.0 };
        landmarks[NOSE_TIP] = Point3D {
            x: 0.5 + nose_offset * 0.4,
            y: 0.5,
            z: 0.0,
        };
        let blendshapes = shapes
            .iter()
            .map(|(name, score)| BlendshapeCategory {
                category_name: name.to_string(),
                score: *score,
            })
            .collect();
        FaceFrame {
            face_landmarks: vec![landmarks],
            face_blendshapes: vec![blendshapes],
        }
    }

    fn classify_default(frame: &FaceFrame) -> GazeState {
        classify(frame, &GazeThresholds::default())
    }

    #[test]
    fn test_no_face_overrides_everything() {
        let state = classify_default(&FaceFrame::default());
        assert!(state.is_no_face);
        assert!(state.is_looking_away);
        assert!(!state.is_multiple_faces);
        assert_eq!(state.face_count, 0);
    }

    #[test]
    fn test_multiple_faces_take_precedence() {
        let mut frame = face(0.0, &[]);
        frame.face_landmarks.push(frame.face_landmarks[0].clone());
        let state = classify_default(&frame);
        assert!(state.is_multiple_faces);
        assert!(state.is_looking_away);
        assert!(!state.is_no_face);
        assert_eq!(state.face_count, 2);
    }

    #[test]
    fn test_centered_face_is_attentive() {
        let state = classify_default(&face(0.0, &[]));
        assert!(!state.is_looking_away);
        assert_eq!(state.gaze_direction, GazeDirection::Center);
        assert!(state.head_yaw.abs() < 1e-9);
    }

    #[test]
    fn test_extreme_turn_is_always_away() {
        // 0.5 * 2.5 = 1.25 yaw, eyes compensating does not matter
        let state = classify_default(&face(0.5, &[("eyeLookOutLeft", 1.0)]));
        assert!(state.is_looking_away);
        assert_eq!(state.gaze_direction, GazeDirection::Right);

        let state = classify_default(&face(-0.5, &[]));
        assert_eq!(state.gaze_direction, GazeDirection::Left);
    }

    #[test]
    fn test_moderate_turn_with_compensating_eyes_is_safe() {
        // yaw = 0.32 * 2.5 = 0.8, eyes looking left (back toward center)
        let state = classify_default(&face(
            0.32,
            &[("eyeLookOutLeft", 0.6), ("eyeLookInRight", 0.6)],
        ));
        assert!(!state.is_looking_away);
        assert!(state.eye_gaze < 0.0);
    }

    #[test]
    fn test_moderate_turn_with_agreeing_eyes_is_away() {
        let state = classify_default(&face(
            0.32,
            &[("eyeLookInLeft", 0.5), ("eyeLookOutRight", 0.5)],
        ));
        assert!(state.is_looking_away);
        assert_eq!(state.gaze_direction, GazeDirection::Right);

        let state = classify_default(&face(
            -0.32,
            &[("eyeLookOutLeft", 0.5), ("eyeLookInRight", 0.5)],
        ));
        assert!(state.is_looking_away);
        assert_eq!(state.gaze_direction, GazeDirection::Left);
    }

    #[test]
    fn test_side_glance_with_centered_head() {
        let state = classify_default(&face(
            0.0,
            &[("eyeLookOutLeft", 0.9), ("eyeLookInRight", 0.8)],
        ));
        assert!(state.is_looking_away);
        assert_eq!(state.gaze_direction, GazeDirection::Left);

        let state = classify_default(&face(
            0.0,
            &[("eyeLookOutLeft", 0.6), ("eyeLookInRight", 0.6)],
        ));
        assert!(!state.is_looking_away);
    }

    #[test]
    fn test_vertical_override() {
        let state = classify_default(&face(0.0, &[("eyeLookUpLeft", 0.85)]));
        assert!(state.is_looking_away);
        assert_eq!(state.gaze_direction, GazeDirection::Up);

        // Reading downward is tolerated up to the lenient threshold
        let state = classify_default(&face(0.0, &[("eyeLookDownLeft", 0.85)]));
        assert!(!state.is_looking_away);

        let state = classify_default(&face(0.0, &[("eyeLookDownLeft", 0.95)]));
        assert_eq!(state.gaze_direction, GazeDirection::Down);
    }

    #[test]
    fn test_blink_requires_both_eyes() {
        let state = classify_default(&face(0.0, &[("eyeBlinkLeft", 0.8), ("eyeBlinkRight", 0.7)]));
        assert!(state.is_blinking);

        let state = classify_default(&face(0.0, &[("eyeBlinkLeft", 0.8)]));
        assert!(!state.is_blinking);
    }

    #[test]
    fn test_missing_landmarks_yield_zero_yaw() {
        let frame = FaceFrame {
            face_landmarks: vec![vec![Point3D::default(); 10]],
            face_blendshapes: vec![],
        };
        let state = classify_default(&frame);
        assert_eq!(state.head_yaw, 0.0);
        assert!(!state.is_looking_away);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let frame = face(0.3, &[("eyeLookInLeft", 0.4), ("eyeLookOutRight", 0.2)]);
        assert_eq!(classify_default(&frame), classify_default(&frame));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const SHAPES: [&str; 10] = [
            "eyeLookInLeft",
            "eyeLookOutLeft",
            "eyeLookInRight",
            "eyeLookOutRight",
            "eyeLookUpLeft",
            "eyeLookDownLeft",
            "eyeBlinkLeft",
            "eyeBlinkRight",
            "jawOpen",
            "mouthSmileLeft",
        ];

        fn blendshapes() -> impl Strategy<Value = Vec<(usize, f64)>> {
            prop::collection::vec((0..SHAPES.len(), 0.0f64..=1.0), 0..SHAPES.len())
        }

        fn frame(faces: usize, nose_offset: f64, shapes: &[(usize, f64)]) -> FaceFrame {
            let named: Vec<(&str, f64)> = shapes.iter().map(|&(i, s)| (SHAPES[i], s)).collect();
            let single = face(nose_offset, &named);
            FaceFrame {
                face_landmarks: vec![single.face_landmarks[0].clone(); faces],
                face_blendshapes: vec![single.face_blendshapes[0].clone(); faces.max(1)],
            }
        }

        proptest! {
            #[test]
            fn prop_no_face_always_looking_away(
                nose_offset in -1.0f64..1.0,
                shapes in blendshapes(),
            ) {
                let state = classify(&frame(0, nose_offset, &shapes), &GazeThresholds::default());
                prop_assert!(state.is_no_face);
                prop_assert!(state.is_looking_away);
                prop_assert!(!state.is_multiple_faces);
                prop_assert_eq!(state.face_count, 0);
            }

            #[test]
            fn prop_multiple_faces_never_no_face(
                faces in 2usize..6,
                nose_offset in -1.0f64..1.0,
                shapes in blendshapes(),
            ) {
                let state = classify(&frame(faces, nose_offset, &shapes), &GazeThresholds::default());
                prop_assert!(state.is_multiple_faces);
                prop_assert!(!state.is_no_face);
                prop_assert!(state.is_looking_away);
                prop_assert_eq!(state.face_count, faces);
            }

            #[test]
            fn prop_classification_is_deterministic(
                nose_offset in -1.0f64..1.0,
                shapes in blendshapes(),
            ) {
                let frame = frame(1, nose_offset, &shapes);
                prop_assert_eq!(
                    classify(&frame, &GazeThresholds::default()),
                    classify(&frame, &GazeThresholds::default())
                );
            }
        }
    }
}
