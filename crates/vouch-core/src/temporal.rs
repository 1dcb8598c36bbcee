//! Temporal reduction of per-frame gesture signals.
//!
//! The challenge names an ordered list of gestures; this module scans the
//! frame sequence and decides which of them actually happened, where, and
//! whether in order. A gesture only counts once it fires on a minimum
//! number of consecutive face-bearing frames (the streak rule), which
//! rejects single-frame noise and everything a static image can produce.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::detect::{self, Signal, Thresholds};
use crate::gesture::Gesture;
use crate::mesh::MeshFrame;

/// Streak length required before a step counts as confirmed.
pub const MIN_CONSECUTIVE_FRAMES: usize = 2;

/// Minimum usable sequence length; shorter inputs are not analyzed.
pub const MIN_FRAMES: usize = 5;

/// Gesture evidence extracted from one submitted frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    /// 0-based position in the submitted sequence.
    pub frame_index: usize,
    pub face_present: bool,
    /// Face-detection confidence; meaningful only when `face_present`.
    pub landmark_confidence: f32,
    /// Signals for the gestures the challenge references.
    pub signals: HashMap<Gesture, Signal>,
}

impl FrameAnalysis {
    /// A frame with no usable face (undecodable input or no detection).
    pub fn absent(frame_index: usize) -> Self {
        Self {
            frame_index,
            face_present: false,
            landmark_confidence: 0.0,
            signals: HashMap::new(),
        }
    }

    /// Run the detectors for `gestures` against an extracted mesh.
    pub fn from_mesh(
        frame_index: usize,
        mesh: &MeshFrame,
        gestures: &[Gesture],
        thresholds: &Thresholds,
    ) -> Self {
        let mut signals = HashMap::with_capacity(gestures.len());
        for &g in gestures {
            signals
                .entry(g)
                .or_insert_with(|| detect::detect(g, &mesh.landmarks, thresholds));
        }
        Self {
            frame_index,
            face_present: true,
            landmark_confidence: mesh.confidence.clamp(0.0, 1.0),
            signals,
        }
    }

    pub fn signal(&self, gesture: Gesture) -> Signal {
        self.signals.get(&gesture).copied().unwrap_or(Signal::NONE)
    }
}

/// Outcome for one required challenge step.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepResult {
    pub step: Gesture,
    pub detected: bool,
    /// Confidence of the confirming observation, or 0 when undetected.
    pub confidence: f32,
    /// 0-based index of the confirming frame, or -1 when undetected.
    pub frame_idx: i64,
}

impl StepResult {
    pub fn undetected(step: Gesture) -> Self {
        Self {
            step,
            detected: false,
            confidence: 0.0,
            frame_idx: -1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemporalOutcome {
    /// One entry per required step, in challenge order.
    pub step_results: Vec<StepResult>,
    /// True when at least one step was detected and detected confirmation
    /// indices are strictly increasing. False for a sequence with no
    /// confirmations at all — the signature of a static replay.
    pub temporal_valid: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemporalError {
    #[error("insufficient frames: got {got}, need at least {need}")]
    InsufficientFrames { got: usize, need: usize },
}

/// Scan `frames` in order looking for the challenge `steps`, in order.
///
/// The cursor only advances when the current step's gesture fires on
/// `min_consecutive` consecutive frames; the confirming frame is the one
/// completing the streak and its confidence is the best
/// gesture-confidence × landmark-confidence seen across the streak. Later
/// steps can therefore only be confirmed on strictly later frames. A
/// repeated gesture in the step list needs a non-firing frame between the
/// previous confirmation and its own streak.
pub fn analyze(
    frames: &[FrameAnalysis],
    steps: &[Gesture],
    min_frames: usize,
    min_consecutive: usize,
) -> Result<TemporalOutcome, TemporalError> {
    if frames.len() < min_frames {
        return Err(TemporalError::InsufficientFrames {
            got: frames.len(),
            need: min_frames,
        });
    }

    let mut results: Vec<StepResult> = steps.iter().map(|&s| StepResult::undetected(s)).collect();
    let mut cursor = 0usize;
    let mut streak = 0usize;
    let mut streak_confidence = 0.0f32;
    // Cleared when the upcoming step repeats the gesture just confirmed;
    // re-set by the first non-firing frame.
    let mut armed = true;

    for frame in frames {
        if cursor >= steps.len() {
            break;
        }
        let step = steps[cursor];
        let signal = frame.signal(step);
        let fired = frame.face_present && signal.fired;

        if !fired {
            streak = 0;
            streak_confidence = 0.0;
            armed = true;
            continue;
        }
        if !armed {
            continue;
        }

        streak += 1;
        streak_confidence = streak_confidence.max(signal.confidence * frame.landmark_confidence);
        if streak >= min_consecutive {
            let result = &mut results[cursor];
            result.detected = true;
            result.confidence = streak_confidence;
            result.frame_idx = frame.frame_index as i64;
            cursor += 1;
            armed = !(cursor < steps.len() && steps[cursor] == step);
            streak = 0;
            streak_confidence = 0.0;
        }
    }

    let confirmed: Vec<i64> = results
        .iter()
        .filter(|r| r.detected)
        .map(|r| r.frame_idx)
        .collect();
    let temporal_valid = !confirmed.is_empty() && confirmed.windows(2).all(|w| w[0] < w[1]);

    Ok(TemporalOutcome {
        step_results: results,
        temporal_valid,
    })
}
