use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use vouch_core::{Gesture, Thresholds};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("VOUCH_JWT_SECRET must be set")]
    MissingJwtSecret,
    #[error("invalid VOUCH_BIND_ADDR: {0}")]
    InvalidBindAddr(String),
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP server binds to (default: 127.0.0.1:8080).
    pub bind_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Origin allowed to call the API from a browser.
    pub allowed_origin: String,
    /// HMAC secret for signing bearer tokens. Required.
    pub jwt_secret: String,
    /// Bearer token lifetime in minutes.
    pub jwt_expiry_minutes: i64,
    /// Challenge lifetime in seconds.
    pub challenge_ttl_secs: u64,
    /// Number of gesture steps per challenge.
    pub challenge_steps: usize,
    /// Gestures challenges may draw from. Tags without a detector are
    /// accepted here but can never be confirmed, so enable them only for
    /// experimentation.
    pub gesture_pool: Vec<Gesture>,
    /// Landmark backend name; only "null" is built in.
    pub mesh_backend: String,
    /// Width frames are downscaled to before extraction.
    pub frame_width: u32,
    /// Minimum frames a verify request must carry.
    pub min_frames: usize,
    /// Frames beyond this count are dropped.
    pub max_frames: usize,
    /// Gesture detector thresholds.
    pub thresholds: Thresholds,
    /// Consecutive firing frames required to confirm a step.
    pub min_consecutive_frames: usize,
    /// Wall-clock budget for a verify's analysis phase, in seconds.
    pub verify_timeout_secs: u64,
    /// Failed verifications a source address may accumulate inside the
    /// rate-limit window before lockout. 0 disables limiting.
    pub rate_limit_max_failures: u32,
    /// Sliding window over which failed verifications are counted, in
    /// seconds.
    pub rate_limit_window_secs: u64,
    /// Lockout applied once the failure cap is reached, in seconds.
    pub rate_limit_lockout_secs: u64,
    /// Interval between expired-challenge sweeps, in seconds.
    pub sweep_interval_secs: u64,
    /// Extra time an expired challenge is kept before deletion, in seconds.
    pub sweep_grace_secs: u64,
}

impl Config {
    /// Load configuration from `VOUCH_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret =
            std::env::var("VOUCH_JWT_SECRET").map_err(|_| ConfigError::MissingJwtSecret)?;
        if jwt_secret.is_empty() {
            return Err(ConfigError::MissingJwtSecret);
        }

        let bind_raw =
            std::env::var("VOUCH_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind_addr = bind_raw
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(bind_raw))?;

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("vouch");

        let db_path = std::env::var("VOUCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("vouch.db"));

        Ok(Self {
            bind_addr,
            db_path,
            allowed_origin: std::env::var("VOUCH_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            jwt_secret,
            jwt_expiry_minutes: env_i64("VOUCH_JWT_EXPIRY_MINUTES", 5),
            challenge_ttl_secs: env_u64("VOUCH_CHALLENGE_EXPIRY_SECONDS", 120),
            challenge_steps: env_usize("VOUCH_CHALLENGE_STEPS", 3),
            gesture_pool: env_gesture_pool("VOUCH_GESTURE_POOL"),
            mesh_backend: std::env::var("VOUCH_MESH_BACKEND")
                .unwrap_or_else(|_| "null".to_string()),
            frame_width: env_u32("VOUCH_FRAME_WIDTH", 320),
            min_frames: env_usize("VOUCH_MIN_FRAMES", 5),
            max_frames: env_usize("VOUCH_MAX_FRAMES", 30),
            thresholds: Thresholds {
                ear: env_f32("VOUCH_EAR_THRESHOLD", 0.21),
                mar: env_f32("VOUCH_MAR_THRESHOLD", 0.55),
                turn: env_f32("VOUCH_TURN_THRESHOLD", 0.035),
            },
            min_consecutive_frames: env_usize("VOUCH_MIN_CONSECUTIVE_FRAMES", 2),
            verify_timeout_secs: env_u64("VOUCH_VERIFY_TIMEOUT_SECS", 10),
            rate_limit_max_failures: env_u32("VOUCH_RATE_LIMIT_MAX_FAILURES", 5),
            rate_limit_window_secs: env_u64("VOUCH_RATE_LIMIT_WINDOW_SECS", 60),
            rate_limit_lockout_secs: env_u64("VOUCH_RATE_LIMIT_LOCKOUT_SECS", 300),
            sweep_interval_secs: env_u64("VOUCH_SWEEP_INTERVAL_SECS", 60),
            sweep_grace_secs: env_u64("VOUCH_SWEEP_GRACE_SECS", 60),
        })
    }

    /// Fixed defaults with the given secret; used by tests.
    #[cfg(test)]
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            db_path: PathBuf::from(":memory:"),
            allowed_origin: "http://localhost:3000".to_string(),
            jwt_secret: jwt_secret.to_string(),
            jwt_expiry_minutes: 5,
            challenge_ttl_secs: 120,
            challenge_steps: 3,
            gesture_pool: Gesture::DEFAULT_POOL.to_vec(),
            mesh_backend: "null".to_string(),
            frame_width: 320,
            min_frames: 5,
            max_frames: 30,
            thresholds: Thresholds::default(),
            min_consecutive_frames: 2,
            verify_timeout_secs: 10,
            rate_limit_max_failures: 5,
            rate_limit_window_secs: 60,
            rate_limit_lockout_secs: 300,
            sweep_interval_secs: 60,
            sweep_grace_secs: 60,
        }
    }
}

fn env_gesture_pool(key: &str) -> Vec<Gesture> {
    let Ok(raw) = std::env::var(key) else {
        return Gesture::DEFAULT_POOL.to_vec();
    };
    let pool: Vec<Gesture> = raw
        .split(',')
        .filter_map(|tag| match tag.trim().parse() {
            Ok(g) => Some(g),
            Err(e) => {
                tracing::warn!(%e, "ignoring gesture in {key}");
                None
            }
        })
        .collect();
    if pool.is_empty() {
        tracing::warn!("{key} contained no valid gestures; using the default pool");
        Gesture::DEFAULT_POOL.to_vec()
    } else {
        pool
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
