//! Per-frame gesture detectors.
//!
//! Each detector is a pure, total function of one frame's landmarks: it
//! yields a `(fired, confidence)` signal and never fails. All features are
//! ratios of landmark distances, so they are independent of frame
//! resolution and of whether coordinates are pixels or normalized.

use crate::gesture::Gesture;
use crate::mesh::{
    Landmarks, FACE_CONTOUR_LEFT, FACE_CONTOUR_RIGHT, LEFT_EYE, LOWER_INNER_LIP,
    MOUTH_CORNER_LEFT, MOUTH_CORNER_RIGHT, NOSE_TIP, RIGHT_EYE, UPPER_INNER_LIP,
};

/// Guard against degenerate geometry (coincident landmarks).
const EPSILON: f32 = 1e-6;

/// Eye aspect ratio reported when the eye span is degenerate. 0.3 is a
/// typical open-eye value, so a broken eye never reads as a blink.
const EAR_FALLBACK: f32 = 0.3;

/// One gesture's evidence for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub fired: bool,
    /// Strength of the evidence in `[0, 1]`; 0 whenever `fired` is false.
    pub confidence: f32,
}

impl Signal {
    pub const NONE: Signal = Signal {
        fired: false,
        confidence: 0.0,
    };
}

/// Detector firing thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// EAR below which an eye counts as closed.
    pub ear: f32,
    /// MAR above which the mouth counts as a smile.
    pub mar: f32,
    /// Absolute nose-offset ratio above which the head counts as turned.
    pub turn: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ear: 0.21,
            mar: 0.55,
            turn: 0.035,
        }
    }
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// EAR = (‖p2−p6‖ + ‖p3−p5‖) / (2·‖p1−p4‖) over one eye's six landmarks.
pub fn eye_aspect_ratio(lm: &Landmarks, eye: &[usize; 6]) -> f32 {
    let p: Vec<[f32; 2]> = eye.iter().map(|&i| lm.point(i)).collect();
    let vertical_1 = distance(p[1], p[5]);
    let vertical_2 = distance(p[2], p[4]);
    let horizontal = distance(p[0], p[3]);
    if horizontal < EPSILON {
        return EAR_FALLBACK;
    }
    (vertical_1 + vertical_2) / (2.0 * horizontal)
}

/// MAR = inner-lip vertical span / mouth-corner horizontal span.
pub fn mouth_aspect_ratio(lm: &Landmarks) -> f32 {
    let vertical = distance(lm.point(UPPER_INNER_LIP), lm.point(LOWER_INNER_LIP));
    let horizontal = distance(lm.point(MOUTH_CORNER_LEFT), lm.point(MOUTH_CORNER_RIGHT));
    if horizontal < EPSILON {
        return 0.0;
    }
    vertical / horizontal
}

/// Signed nose offset: (nose_x − face_center_x) / face_width.
///
/// Positive means the nose sits toward image-space `+x` (rightward); any
/// client-side display mirroring must not be applied to the frames sent
/// for analysis.
pub fn nose_offset(lm: &Landmarks) -> f32 {
    let left = lm.point(FACE_CONTOUR_LEFT);
    let right = lm.point(FACE_CONTOUR_RIGHT);
    let face_width = right[0] - left[0];
    if face_width.abs() < EPSILON {
        return 0.0;
    }
    let center_x = (left[0] + right[0]) / 2.0;
    (lm.point(NOSE_TIP)[0] - center_x) / face_width
}

/// Evaluate one gesture against one frame's landmarks.
///
/// Gestures without a detector (`brow_raise`, `tongue_out`) never fire.
pub fn detect(gesture: Gesture, lm: &Landmarks, t: &Thresholds) -> Signal {
    match gesture {
        Gesture::Blink => {
            let ear = eye_aspect_ratio(lm, &LEFT_EYE).min(eye_aspect_ratio(lm, &RIGHT_EYE));
            let fired = ear < t.ear;
            Signal {
                fired,
                confidence: if fired {
                    ((t.ear - ear) / t.ear).clamp(0.0, 1.0)
                } else {
                    0.0
                },
            }
        }
        Gesture::Smile => {
            let mar = mouth_aspect_ratio(lm);
            let fired = mar > t.mar;
            Signal {
                fired,
                confidence: if fired {
                    ((mar - t.mar) / t.mar).clamp(0.0, 1.0)
                } else {
                    0.0
                },
            }
        }
        Gesture::TurnLeft | Gesture::TurnRight => {
            let r = nose_offset(lm);
            let fired = match gesture {
                Gesture::TurnRight => r > t.turn,
                _ => r < -t.turn,
            };
            Signal {
                fired,
                confidence: if fired {
                    ((r.abs() - t.turn) / t.turn).clamp(0.0, 1.0)
                } else {
                    0.0
                },
            }
        }
        Gesture::BrowRaise | Gesture::TongueOut => Signal::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::mesh_with;

    const T: Thresholds = Thresholds {
        ear: 0.21,
        mar: 0.55,
        turn: 0.035,
    };

    #[test]
    fn open_eyes_do_not_blink() {
        let lm = mesh_with(0.3, 0.1, 0.0);
        let sig = detect(Gesture::Blink, &lm, &T);
        assert!(!sig.fired);
        assert_eq!(sig.confidence, 0.0);
    }

    #[test]
    fn closed_eyes_blink_with_confidence() {
        let lm = mesh_with(0.18, 0.1, 0.0);
        let sig = detect(Gesture::Blink, &lm, &T);
        assert!(sig.fired);
        // (0.21 - 0.18) / 0.21 ≈ 0.1429
        assert!((sig.confidence - 0.142_857).abs() < 1e-3);
    }

    #[test]
    fn extreme_blink_confidence_caps_at_one() {
        let lm = mesh_with(0.0, 0.1, 0.0);
        let sig = detect(Gesture::Blink, &lm, &T);
        assert!(sig.fired);
        assert!((sig.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn neutral_mouth_is_not_a_smile() {
        let lm = mesh_with(0.3, 0.1, 0.0);
        assert!(!detect(Gesture::Smile, &lm, &T).fired);
    }

    #[test]
    fn wide_mouth_smiles() {
        let lm = mesh_with(0.3, 0.60, 0.0);
        let sig = detect(Gesture::Smile, &lm, &T);
        assert!(sig.fired);
        // (0.60 - 0.55) / 0.55 ≈ 0.0909
        assert!((sig.confidence - 0.0909).abs() < 1e-3);
    }

    #[test]
    fn nose_offset_is_signed() {
        let right = mesh_with(0.3, 0.1, 0.05);
        assert!(nose_offset(&right) > 0.0);
        let left = mesh_with(0.3, 0.1, -0.05);
        assert!(nose_offset(&left) < 0.0);
    }

    #[test]
    fn turn_right_fires_only_rightward() {
        let lm = mesh_with(0.3, 0.1, 0.05);
        let sig = detect(Gesture::TurnRight, &lm, &T);
        assert!(sig.fired);
        // (0.05 - 0.035) / 0.035 ≈ 0.4286
        assert!((sig.confidence - 0.4286).abs() < 1e-3);
        let opposite = detect(Gesture::TurnLeft, &lm, &T);
        assert!(!opposite.fired);
        assert_eq!(opposite.confidence, 0.0);
    }

    #[test]
    fn turn_left_fires_only_leftward() {
        let lm = mesh_with(0.3, 0.1, -0.05);
        assert!(detect(Gesture::TurnLeft, &lm, &T).fired);
        assert!(!detect(Gesture::TurnRight, &lm, &T).fired);
    }

    #[test]
    fn centered_nose_fires_neither_turn() {
        let lm = mesh_with(0.3, 0.1, 0.0);
        assert!(!detect(Gesture::TurnLeft, &lm, &T).fired);
        assert!(!detect(Gesture::TurnRight, &lm, &T).fired);
    }

    #[test]
    fn undetectable_gestures_never_fire() {
        // Even a frame that would trip every geometric detector.
        let lm = mesh_with(0.05, 0.9, 0.2);
        assert_eq!(detect(Gesture::BrowRaise, &lm, &T), Signal::NONE);
        assert_eq!(detect(Gesture::TongueOut, &lm, &T), Signal::NONE);
    }

    #[test]
    fn degenerate_landmarks_are_harmless() {
        // All points at the origin: every span is zero.
        let lm = Landmarks::new(vec![[0.0, 0.0]; 468]);
        assert_eq!(eye_aspect_ratio(&lm, &LEFT_EYE), EAR_FALLBACK);
        assert_eq!(mouth_aspect_ratio(&lm), 0.0);
        assert_eq!(nose_offset(&lm), 0.0);
        for g in [Gesture::Blink, Gesture::Smile, Gesture::TurnLeft, Gesture::TurnRight] {
            assert!(!detect(g, &lm, &T).fired, "{g} fired on degenerate landmarks");
        }
    }

    #[test]
    fn empty_landmark_set_is_harmless() {
        let lm = Landmarks::new(Vec::new());
        for g in [Gesture::Blink, Gesture::Smile, Gesture::TurnLeft, Gesture::TurnRight] {
            assert!(!detect(g, &lm, &T).fired);
        }
    }
}
