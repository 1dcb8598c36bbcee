//! Deterministic fixtures for pipeline tests.
//!
//! Real mesh output is neither deterministic nor available in CI, so tests
//! build synthetic landmark sets with known EAR / MAR / nose-offset values
//! and script extractor output frame by frame.

use std::collections::VecDeque;

use crate::detect::Thresholds;
use crate::gesture::Gesture;
use crate::mesh::{
    LandmarkExtractor, Landmarks, MeshFrame, FACE_CONTOUR_LEFT, FACE_CONTOUR_RIGHT, LEFT_EYE,
    LOWER_INNER_LIP, MESH_LANDMARK_COUNT, MOUTH_CORNER_LEFT, MOUTH_CORNER_RIGHT, NOSE_TIP,
    RIGHT_EYE, UPPER_INNER_LIP,
};
use crate::temporal::FrameAnalysis;

/// Landmark confidence used by all fixtures unless overridden.
pub const FIXTURE_CONFIDENCE: f32 = 0.9;

/// Build a full mesh with the requested feature values.
///
/// The synthetic face is 200 units wide with eyes spanning 40 units and a
/// 60-unit mouth; all landmarks not read by the detectors sit at the
/// origin.
pub fn mesh_with(ear: f32, mar: f32, nose_offset: f32) -> Landmarks {
    let mut pts = vec![[0.0f32, 0.0f32]; MESH_LANDMARK_COUNT];

    // Face contour: width 200, centered at x = 200.
    pts[FACE_CONTOUR_LEFT] = [100.0, 150.0];
    pts[FACE_CONTOUR_RIGHT] = [300.0, 150.0];
    pts[NOSE_TIP] = [200.0 + nose_offset * 200.0, 180.0];

    // Eyes: horizontal span 40, so EAR = vertical / 40.
    let eye_half = ear * 40.0 / 2.0;
    place_eye(&mut pts, &RIGHT_EYE, 140.0, eye_half);
    place_eye(&mut pts, &LEFT_EYE, 220.0, eye_half);

    // Mouth: corner span 60, so MAR = vertical / 60.
    let lip_half = mar * 60.0 / 2.0;
    pts[MOUTH_CORNER_LEFT] = [170.0, 200.0];
    pts[MOUTH_CORNER_RIGHT] = [230.0, 200.0];
    pts[UPPER_INNER_LIP] = [200.0, 200.0 - lip_half];
    pts[LOWER_INNER_LIP] = [200.0, 200.0 + lip_half];

    Landmarks::new(pts)
}

fn place_eye(pts: &mut [[f32; 2]], eye: &[usize; 6], x0: f32, half: f32) {
    let y = 120.0;
    pts[eye[0]] = [x0, y]; // p1
    pts[eye[1]] = [x0 + 10.0, y - half]; // p2
    pts[eye[2]] = [x0 + 30.0, y - half]; // p3
    pts[eye[3]] = [x0 + 40.0, y]; // p4
    pts[eye[4]] = [x0 + 30.0, y + half]; // p5
    pts[eye[5]] = [x0 + 10.0, y + half]; // p6
}

/// Canonical single-frame poses used across the test suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePose {
    /// Eyes open, mouth closed, nose centered.
    Baseline,
    /// EAR 0.18.
    Blink,
    /// MAR 0.60.
    Smile,
    /// Nose offset +0.05.
    TurnRight,
    /// Nose offset −0.05.
    TurnLeft,
}

impl FramePose {
    pub fn landmarks(self) -> Landmarks {
        match self {
            FramePose::Baseline => mesh_with(0.3, 0.1, 0.0),
            FramePose::Blink => mesh_with(0.18, 0.1, 0.0),
            FramePose::Smile => mesh_with(0.3, 0.60, 0.0),
            FramePose::TurnRight => mesh_with(0.3, 0.1, 0.05),
            FramePose::TurnLeft => mesh_with(0.3, 0.1, -0.05),
        }
    }

    pub fn mesh_frame(self) -> MeshFrame {
        MeshFrame {
            landmarks: self.landmarks(),
            confidence: FIXTURE_CONFIDENCE,
        }
    }
}

/// One analyzed frame holding a posed face.
pub fn frame_for(index: usize, pose: FramePose, gestures: &[Gesture]) -> FrameAnalysis {
    FrameAnalysis::from_mesh(index, &pose.mesh_frame(), gestures, &Thresholds::default())
}

/// One analyzed frame with no face.
pub fn frame_absent(index: usize) -> FrameAnalysis {
    FrameAnalysis::absent(index)
}

/// Analyzed frames for a whole posed sequence.
pub fn scripted_frames(poses: &[FramePose], gestures: &[Gesture]) -> Vec<FrameAnalysis> {
    poses
        .iter()
        .enumerate()
        .map(|(i, &p)| frame_for(i, p, gestures))
        .collect()
}

/// Extractor that replays a scripted sequence of mesh results, ignoring
/// pixel content. `None` entries simulate no-face frames; an exhausted
/// script keeps returning no face.
pub struct ScriptedExtractor {
    script: VecDeque<Option<MeshFrame>>,
}

impl ScriptedExtractor {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Option<MeshFrame>>,
    {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// Script built from poses; `None` poses are no-face frames.
    pub fn from_poses(poses: &[Option<FramePose>]) -> Self {
        Self::new(poses.iter().map(|p| p.map(FramePose::mesh_frame)))
    }
}

impl LandmarkExtractor for ScriptedExtractor {
    fn extract(&mut self, _rgb: &[u8], _width: u32, _height: u32) -> Option<MeshFrame> {
        self.script.pop_front().flatten()
    }
}
