//! Composite liveness score and verdict.
//!
//! Step completion alone is not enough: a replay attack can contain a few
//! cherry-picked gesture frames while most of the clip shows no face at
//! all. The 60/20/20 split makes face presence and detection confidence
//! count alongside the steps themselves.

use crate::temporal::StepResult;

/// Minimum composite score for a pass.
pub const PASS_THRESHOLD: f64 = 70.0;

#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub step_results: &'a [StepResult],
    pub face_detected_count: usize,
    pub total_frames: usize,
    /// Landmark confidence of every frame where a face was found.
    pub landmark_confidences: &'a [f32],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// Steps completed, worth up to 60.
    pub step_score: f64,
    /// Face-presence ratio, worth up to 20.
    pub presence_score: f64,
    /// Mean landmark confidence over face frames, worth up to 20.
    pub confidence_score: f64,
    /// Composite in [0, 100], one decimal.
    pub liveness_score: f64,
    pub passed: bool,
}

/// Combine the analysis into a scalar score and verdict.
///
/// Pass requires every step detected, a face in at least half of the
/// frames (rounded up), and a composite score of at least
/// [`PASS_THRESHOLD`].
pub fn score(input: ScoreInput<'_>) -> Score {
    let total_steps = input.step_results.len();
    let detected = input
        .step_results
        .iter()
        .filter(|r| r.detected)
        .count();

    let step_score = if total_steps > 0 {
        detected as f64 / total_steps as f64 * 60.0
    } else {
        0.0
    };

    let presence_score = if input.total_frames > 0 {
        input.face_detected_count as f64 / input.total_frames as f64 * 20.0
    } else {
        0.0
    };

    let confidence_score = if input.landmark_confidences.is_empty() {
        0.0
    } else {
        let mean = input
            .landmark_confidences
            .iter()
            .map(|&c| f64::from(c))
            .sum::<f64>()
            / input.landmark_confidences.len() as f64;
        mean * 20.0
    };

    let raw = (step_score + presence_score + confidence_score).clamp(0.0, 100.0);
    let liveness_score = (raw * 10.0).round() / 10.0;

    // face_detected_count >= ceil(total / 2), in integer arithmetic
    let majority_present = input.face_detected_count * 2 >= input.total_frames;
    let passed = total_steps > 0
        && detected == total_steps
        && majority_present
        && liveness_score >= PASS_THRESHOLD;

    Score {
        step_score,
        presence_score,
        confidence_score,
        liveness_score,
        passed,
    }
}
