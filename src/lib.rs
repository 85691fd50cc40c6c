//! steprunner -- scripted browser-interaction runs with pollable status.
//!
//! This crate provides the execution engine that turns declarative step
//! lists into driver calls, the per-run log registry, the driver backends,
//! and the HTTP API that fronts them.

pub mod api;
pub mod config;
pub mod driver;
pub mod engine;
pub mod logs;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::engine::{Engine, RunStore};
use crate::logs::LogRegistry;

/// Build an engine over fresh in-memory stores and the configured driver.
pub fn build_engine(config: &AppConfig) -> Result<Engine> {
    let driver = driver::from_config(&config.driver)?;
    tracing::info!(backend = driver.name(), "Driver backend ready");
    Ok(Engine::new(
        RunStore::new(),
        LogRegistry::new(),
        driver,
        config.engine.clone(),
    ))
}

/// Start the HTTP service and serve until Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<()> {
    let engine = build_engine(&config)?;
    let app = api::router(api::state::AppState { engine }, config.server.cors_permissive);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;

    tracing::info!(%addr, "steprunner listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("steprunner stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
