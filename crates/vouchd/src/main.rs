use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;
use vouch_core::{LandmarkExtractor, NullExtractor};

mod clock;
mod config;
mod extractor;
mod frames;
mod http;
mod pipeline;
mod rate_limiter;
mod store;
mod token;

use clock::{Clock, SystemClock};
use config::Config;
use http::AppState;
use pipeline::Pipeline;
use rate_limiter::RateLimiter;
use store::Store;
use token::TokenService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env().context("invalid configuration")?);
    tracing::info!(
        db = %config.db_path.display(),
        addr = %config.bind_addr,
        steps = config.challenge_steps,
        "vouchd starting"
    );

    let store = Store::open(&config.db_path)
        .await
        .context("failed to open store")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens = TokenService::new(
        config.jwt_secret.as_bytes(),
        config.jwt_expiry_minutes,
        store.clone(),
    );

    let backend = mesh_backend(&config)?;
    let extractor = extractor::spawn_extractor(backend);

    let pipeline = Pipeline::new(
        config.clone(),
        store.clone(),
        tokens.clone(),
        extractor,
        clock.clone(),
    );

    // Expired challenges are reclaimed off the request path.
    tokio::spawn(sweeper(
        store.clone(),
        clock.clone(),
        config.sweep_interval_secs,
        config.sweep_grace_secs,
    ));

    let app = http::router(AppState {
        config: config.clone(),
        pipeline,
        tokens,
        clock,
        limiter: Arc::new(Mutex::new(RateLimiter::from_config(&config))),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("failed to bind")?;
    tracing::info!(addr = %config.bind_addr, "vouchd listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("vouchd shutting down");
    Ok(())
}

/// Select the landmark backend named in the configuration.
///
/// Only the null backend is built in; real deployments wire a
/// `LandmarkExtractor` implementation over their mesh model here.
fn mesh_backend(config: &Config) -> Result<Box<dyn LandmarkExtractor>> {
    match config.mesh_backend.as_str() {
        "null" => {
            tracing::warn!(
                "mesh backend is 'null' — every frame reads as face-absent and all \
                 verifications will fail; configure a real landmark backend"
            );
            Ok(Box::new(NullExtractor))
        }
        other => bail!("unknown mesh backend '{other}'"),
    }
}

async fn sweeper(store: Store, clock: Arc<dyn Clock>, interval_secs: u64, grace_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match store.sweep_challenges(clock.now(), grace_secs).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "swept expired challenges"),
            Err(e) => tracing::warn!(error = %e, "challenge sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
