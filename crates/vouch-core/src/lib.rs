//! Core liveness verification pipeline.
//!
//! A liveness check asks the subject to perform a short, randomized sequence
//! of facial gestures in front of the camera. This crate holds everything
//! needed to decide whether a sequence of still frames shows those gestures
//! happening, in order:
//!
//! - [`mesh`] — face-mesh landmark types and the pluggable extractor
//!   boundary (the mesh model itself is an external resource).
//! - [`gesture`] — the closed set of supported gestures and challenge-step
//!   sampling.
//! - [`detect`] — per-frame gesture detectors (EAR, MAR, nose offset).
//! - [`temporal`] — reduction across the frame sequence enforcing ordered,
//!   multi-frame gesture confirmation.
//! - [`score`] — the composite liveness score and pass/fail verdict.
//!
//! Everything here is pure and synchronous; persistence, HTTP, and image
//! decoding live in the daemon crate.

pub mod detect;
pub mod gesture;
pub mod mesh;
pub mod score;
pub mod temporal;
pub mod test_util;

pub use detect::{Signal, Thresholds};
pub use gesture::{sample_steps, Gesture, UnknownGesture};
pub use mesh::{Landmarks, LandmarkExtractor, MeshFrame, NullExtractor};
pub use score::{score, Score, ScoreInput};
pub use temporal::{analyze, FrameAnalysis, StepResult, TemporalError, TemporalOutcome};
