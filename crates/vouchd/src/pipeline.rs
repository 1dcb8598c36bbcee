//! Verification orchestrator.
//!
//! Ties the stores, the extractor worker, and the core pipeline together:
//! consume the challenge, ingest frames, detect, reduce, score, and mint a
//! token on a pass. The challenge burns *before* analysis — it is a
//! one-shot nonce, not a retry budget, so a failed or cancelled verify
//! costs the client a fresh challenge.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use thiserror::Error;
use vouch_core::temporal::{self, FrameAnalysis, StepResult, TemporalError};
use vouch_core::{sample_steps, score, Gesture, ScoreInput};

use crate::clock::Clock;
use crate::config::Config;
use crate::extractor::{ExtractorError, ExtractorHandle};
use crate::frames;
use crate::store::{Challenge, Store, StoreError};
use crate::token::{TokenError, TokenService};

/// Fixed pseudo-challenge used by the attack-simulation path.
pub const ATTACK_SIM_STEPS: [Gesture; 3] = [Gesture::Blink, Gesture::TurnRight, Gesture::Smile];

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("verification timed out")]
    Timeout,
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// The full analysis of one frame sequence against one step list.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub step_results: Vec<StepResult>,
    pub temporal_valid: bool,
    pub face_detected_count: usize,
    pub total_frames: usize,
    pub liveness_score: f64,
    pub passed: bool,
    pub decode_failures: usize,
    /// Fewer frames than the analyzer's minimum; no matching was
    /// attempted.
    pub below_min_frames: bool,
    /// The sequence carried too little usable signal for the verdict to
    /// be trusted: undecodable frames past the tolerance, or a
    /// sub-minimum sequence. Always forces `passed` to false.
    pub insufficient_signal: bool,
}

impl Analysis {
    pub fn steps_detected(&self) -> usize {
        self.step_results.iter().filter(|r| r.detected).count()
    }
}

/// Pass/fail half of a verification, kept tagged until the HTTP boundary
/// flattens it.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Passed {
        token: String,
        token_expires_at: chrono::DateTime<chrono::Utc>,
    },
    Failed {
        insufficient_signal: bool,
    },
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub analysis: Analysis,
    pub outcome: VerifyOutcome,
}

/// Request-facing surface of the liveness core.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    store: Store,
    tokens: TokenService,
    extractor: ExtractorHandle,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: Store,
        tokens: TokenService,
        extractor: ExtractorHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            tokens,
            extractor,
            clock,
        }
    }

    /// Create and persist a fresh randomized challenge.
    pub async fn new_challenge(&self) -> Result<Challenge, StoreError> {
        let steps = sample_steps(
            &mut OsRng,
            &self.config.gesture_pool,
            self.config.challenge_steps,
        );
        let challenge = self
            .store
            .create_challenge(steps, self.clock.now(), self.config.challenge_ttl_secs)
            .await?;
        tracing::info!(
            challenge = %challenge.id,
            steps = ?challenge.steps,
            created_at = %challenge.created_at,
            expires_at = %challenge.expires_at,
            "challenge created"
        );
        Ok(challenge)
    }

    /// Verify a frame sequence against a previously issued challenge.
    ///
    /// The challenge is consumed first; any lifecycle error returns before
    /// a single frame is decoded.
    pub async fn verify(
        &self,
        challenge_id: &str,
        frames: &[String],
    ) -> Result<VerifyReport, VerifyError> {
        let challenge = self
            .store
            .consume_challenge(challenge_id, self.clock.now())
            .await?;
        debug_assert!(challenge.used);
        tracing::info!(
            challenge = %challenge.id,
            frames = frames.len(),
            "challenge consumed; analyzing"
        );

        let budget = Duration::from_secs(self.config.verify_timeout_secs);
        let analysis = tokio::time::timeout(budget, self.run_analysis(frames, &challenge.steps))
            .await
            .map_err(|_| VerifyError::Timeout)??;

        let details = serde_json::to_string(&analysis.step_results).unwrap_or_default();
        self.store
            .record_attempt(
                &challenge.id,
                analysis.passed,
                analysis.liveness_score,
                &details,
                self.clock.now(),
            )
            .await?;

        let outcome = if analysis.passed {
            let issued = self.tokens.issue(&challenge.id, self.clock.now()).await?;
            tracing::info!(
                challenge = %challenge.id,
                score = analysis.liveness_score,
                "verification passed; token issued"
            );
            VerifyOutcome::Passed {
                token: issued.token,
                token_expires_at: issued.expires_at,
            }
        } else {
            tracing::info!(
                challenge = %challenge.id,
                score = analysis.liveness_score,
                steps_detected = analysis.steps_detected(),
                faces = analysis.face_detected_count,
                decode_failures = analysis.decode_failures,
                "verification failed"
            );
            VerifyOutcome::Failed {
                insufficient_signal: analysis.insufficient_signal,
            }
        };

        Ok(VerifyReport { analysis, outcome })
    }

    /// Run the pipeline against caller-supplied frames with the fixed
    /// pseudo-challenge. No challenge record is consulted, created, or
    /// consumed, and no token is ever issued.
    pub async fn attack_sim(&self, frames: &[String]) -> Result<Analysis, VerifyError> {
        let budget = Duration::from_secs(self.config.verify_timeout_secs);
        tokio::time::timeout(budget, self.run_analysis(frames, &ATTACK_SIM_STEPS))
            .await
            .map_err(|_| VerifyError::Timeout)?
    }

    /// Decode, extract, detect, reduce, score. Pure with respect to
    /// storage.
    async fn run_analysis(
        &self,
        frames: &[String],
        steps: &[Gesture],
    ) -> Result<Analysis, VerifyError> {
        let total = frames.len().min(self.config.max_frames);
        let frames = &frames[..total];

        let mut analyses = Vec::with_capacity(total);
        let mut decode_failures = 0usize;
        let mut face_detected_count = 0usize;
        let mut confidences = Vec::new();

        for (idx, payload) in frames.iter().enumerate() {
            let analysis = match frames::decode_frame(payload, self.config.frame_width) {
                None => {
                    decode_failures += 1;
                    FrameAnalysis::absent(idx)
                }
                Some(frame) => {
                    match self
                        .extractor
                        .extract(frame.rgb, frame.width, frame.height)
                        .await?
                    {
                        None => FrameAnalysis::absent(idx),
                        Some(mesh) => {
                            face_detected_count += 1;
                            let analysis = FrameAnalysis::from_mesh(
                                idx,
                                &mesh,
                                steps,
                                &self.config.thresholds,
                            );
                            confidences.push(analysis.landmark_confidence);
                            analysis
                        }
                    }
                }
            };
            analyses.push(analysis);
        }

        let (step_results, temporal_valid, below_min_frames) = match temporal::analyze(
            &analyses,
            steps,
            self.config.min_frames,
            self.config.min_consecutive_frames,
        ) {
            Ok(out) => (out.step_results, out.temporal_valid, false),
            Err(TemporalError::InsufficientFrames { .. }) => (
                steps.iter().map(|&s| StepResult::undetected(s)).collect(),
                false,
                true,
            ),
        };

        let verdict = score(ScoreInput {
            step_results: &step_results,
            face_detected_count,
            total_frames: total,
            landmark_confidences: &confidences,
        });

        // Decode attrition past half the sequence, like a sub-minimum
        // sequence, leaves nothing a verdict can stand on.
        let decode_starved = total > 0 && decode_failures * 2 > total;
        let insufficient_signal = decode_starved || below_min_frames;
        let passed = verdict.passed && !insufficient_signal;

        Ok(Analysis {
            step_results,
            temporal_valid,
            face_detected_count,
            total_frames: total,
            liveness_score: verdict.liveness_score,
            passed,
            decode_failures,
            below_min_frames,
            insufficient_signal,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
