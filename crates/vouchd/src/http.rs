//! HTTP surface of the daemon.
//!
//! Thin layer over [`Pipeline`]: DTOs, error-to-status mapping, bearer
//! extraction, CORS. The tagged verify outcome is flattened to the wire
//! shape here and nowhere else.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use vouch_core::score::PASS_THRESHOLD;
use vouch_core::temporal::StepResult;
use vouch_core::Gesture;

use crate::clock::Clock;
use crate::config::Config;
use crate::pipeline::{Analysis, Pipeline, VerifyError, VerifyOutcome, VerifyReport};
use crate::rate_limiter::RateLimiter;
use crate::store::StoreError;
use crate::token::{TokenError, TokenService};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Pipeline,
    pub tokens: TokenService,
    pub clock: Arc<dyn Clock>,
    pub limiter: Arc<Mutex<RateLimiter>>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origin);
    Router::new()
        .route("/api/health", get(health))
        .route("/api/challenge", post(create_challenge))
        .route("/api/verify", post(verify))
        .route("/api/protected", get(protected))
        .route("/api/attack-sim", post(attack_sim))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        Err(_) => {
            tracing::warn!(origin, "invalid allowed origin; responding without CORS headers");
            CorsLayer::new()
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("challenge not found")]
    ChallengeNotFound,
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("challenge already used")]
    ChallengeUsed,
    #[error("{0}")]
    BadRequest(String),
    #[error("missing bearer token")]
    MissingToken,
    #[error("{0}")]
    Unauthorized(TokenError),
    #[error("verification timed out")]
    Timeout,
    #[error("too many failed attempts; try again in {0}s")]
    RateLimited(u64),
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChallengeNotFound => "not_found",
            Self::ChallengeExpired => "expired",
            Self::ChallengeUsed => "already_used",
            Self::BadRequest(_) => "invalid_request",
            Self::MissingToken => "missing_token",
            Self::Unauthorized(e) => match e {
                TokenError::Expired => "expired",
                TokenError::Revoked => "revoked",
                TokenError::Unknown => "unknown",
                _ => "invalid_signature",
            },
            Self::Timeout => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Internal => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ChallengeNotFound => StatusCode::NOT_FOUND,
            Self::ChallengeExpired | Self::ChallengeUsed => StatusCode::GONE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingToken | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.kind(),
            "detail": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::ChallengeNotFound,
            StoreError::Expired => ApiError::ChallengeExpired,
            StoreError::AlreadyUsed => ApiError::ChallengeUsed,
            other => {
                tracing::error!(error = %other, "storage failure");
                ApiError::Internal
            }
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::Store(e) => e.into(),
            VerifyError::Timeout => ApiError::Timeout,
            VerifyError::Extractor(e) => {
                tracing::error!(error = %e, "extractor failure");
                ApiError::Internal
            }
            VerifyError::Token(e) => {
                tracing::error!(error = %e, "token issuance failure");
                ApiError::Internal
            }
        }
    }
}

/// Map a validation failure on `/api/protected` to its 401 kind.
fn auth_error(e: TokenError) -> ApiError {
    match e {
        TokenError::InvalidSignature
        | TokenError::Expired
        | TokenError::Revoked
        | TokenError::Unknown => ApiError::Unauthorized(e),
        other => {
            tracing::error!(error = %other, "token validation failure");
            ApiError::Internal
        }
    }
}

// ── DTOs ──────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

#[derive(Serialize)]
struct ChallengeResponse {
    challenge_id: String,
    steps: Vec<Gesture>,
    expires_at: String,
    expires_in_seconds: i64,
}

#[derive(Deserialize)]
struct VerifyRequest {
    challenge_id: String,
    frames: Vec<String>,
}

#[derive(Serialize, Debug)]
struct VerifyResponse {
    passed: bool,
    liveness_score: f64,
    step_results: Vec<StepResult>,
    face_detected_count: usize,
    total_frames: usize,
    temporal_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

impl VerifyResponse {
    fn from_report(report: VerifyReport) -> Self {
        let analysis = report.analysis;
        let (token, token_expires_at, error) = match report.outcome {
            VerifyOutcome::Passed {
                token,
                token_expires_at,
            } => (Some(token), Some(rfc3339(token_expires_at)), None),
            VerifyOutcome::Failed {
                insufficient_signal,
            } => (None, None, insufficient_signal.then_some("insufficient_signal")),
        };
        Self {
            passed: analysis.passed,
            liveness_score: analysis.liveness_score,
            step_results: analysis.step_results,
            face_detected_count: analysis.face_detected_count,
            total_frames: analysis.total_frames,
            temporal_valid: analysis.temporal_valid,
            token,
            token_expires_at,
            error,
        }
    }
}

#[derive(Serialize, Debug)]
struct ProtectedResponse {
    message: &'static str,
    user: String,
    token_issued_at: String,
    token_expires_at: String,
    access_level: &'static str,
}

#[derive(Deserialize)]
struct AttackSimRequest {
    frames: Vec<String>,
}

#[derive(Serialize, Debug)]
struct AttackSimResponse {
    passed: bool,
    liveness_score: f64,
    rejection_reason: String,
    step_results: Vec<StepResult>,
    recommendation: &'static str,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: rfc3339(state.clock.now()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Generate a new randomized multi-step challenge.
async fn create_challenge(
    State(state): State<AppState>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.pipeline.new_challenge().await?;
    let expires_in = (challenge.expires_at - state.clock.now()).num_seconds();
    Ok(Json(ChallengeResponse {
        challenge_id: challenge.id,
        steps: challenge.steps,
        expires_at: rfc3339(challenge.expires_at),
        expires_in_seconds: expires_in,
    }))
}

/// Verify a frame sequence against a challenge; issues a bearer token on
/// a pass.
async fn verify(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    if body.challenge_id.trim().is_empty() {
        return Err(ApiError::BadRequest("challenge_id is required".to_string()));
    }
    // Sub-minimum frame counts are not rejected here: they go through the
    // pipeline, consume the challenge, and come back as an
    // insufficient_signal soft failure. Only an empty list is malformed.
    if body.frames.is_empty() {
        return Err(ApiError::BadRequest("at least one frame is required".to_string()));
    }

    let ip = addr.ip();
    state
        .limiter
        .lock()
        .await
        .admit(ip)
        .map_err(ApiError::RateLimited)?;

    let result = state.pipeline.verify(&body.challenge_id, &body.frames).await;

    // Only a completed analysis counts toward the limiter; lifecycle and
    // infrastructure errors do not.
    if let Ok(report) = &result {
        state.limiter.lock().await.observe(ip, report.analysis.passed);
    }

    let report = result?;
    Ok(Json(VerifyResponse::from_report(report)))
}

/// Demo resource gated on a valid, unexpired, unrevoked bearer token.
async fn protected(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProtectedResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let claims = state
        .tokens
        .validate(token, state.clock.now())
        .await
        .map_err(auth_error)?;

    Ok(Json(ProtectedResponse {
        message: "Access granted: liveness verified.",
        user: claims.sub,
        token_issued_at: rfc3339_ts(claims.iat),
        token_expires_at: rfc3339_ts(claims.exp),
        access_level: "full",
    }))
}

/// Run the pipeline against caller frames with no challenge and no token,
/// reporting why non-live input fails.
async fn attack_sim(
    State(state): State<AppState>,
    Json(body): Json<AttackSimRequest>,
) -> Result<Json<AttackSimResponse>, ApiError> {
    if body.frames.is_empty() {
        return Err(ApiError::BadRequest("at least one frame is required".to_string()));
    }

    let analysis = state.pipeline.attack_sim(&body.frames).await?;
    let rejection_reason = rejection_reason(&analysis);
    let recommendation = if analysis.passed {
        "Frames unexpectedly passed — review challenge difficulty."
    } else {
        "Attack rejected: static images and replays cannot produce the \
         required temporal sequence of gestures."
    };

    Ok(Json(AttackSimResponse {
        passed: analysis.passed,
        liveness_score: analysis.liveness_score,
        rejection_reason,
        step_results: analysis.step_results,
        recommendation,
    }))
}

fn rejection_reason(analysis: &Analysis) -> String {
    if analysis.passed {
        return "N/A — passed (unexpected for an attack simulation)".to_string();
    }
    if analysis.face_detected_count == 0 {
        return "No face detected in any frame".to_string();
    }
    if analysis.below_min_frames {
        return "Too few usable frames for analysis".to_string();
    }
    if analysis.insufficient_signal {
        return "Most frames were undecodable — insufficient signal".to_string();
    }
    if !analysis.temporal_valid {
        return "No temporal variation detected — likely a static image".to_string();
    }
    if analysis.liveness_score < PASS_THRESHOLD {
        return format!(
            "Liveness score too low ({}) — insufficient gestural response",
            analysis.liveness_score
        );
    }
    "Frames showed motion but failed the challenge ordering".to_string()
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::MissingToken)
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn rfc3339_ts(secs: i64) -> String {
    rfc3339(DateTime::from_timestamp(secs, 0).unwrap_or_default())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
