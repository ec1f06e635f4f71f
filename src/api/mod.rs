mod error;
mod fhir;
mod handlers;
mod realtime;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tracing::info;

use crate::config::AnalyticsConfig;

use realtime::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AnalyticsConfig>,
    pub registry: ConnectionRegistry,
}

impl AppState {
    pub fn new(pool: PgPool, config: AnalyticsConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            registry: ConnectionRegistry::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/analytics/patterns", get(handlers::patterns))
        .route("/api/analytics/trigger", post(handlers::trigger))
        .route("/api/analytics/{period}", get(handlers::period_summary))
        .route("/api/fhir/analytics/latest", get(fhir::latest_observations))
        .route(
            "/api/fhir/analytics/user/{user_id}",
            get(fhir::user_observations),
        )
        .route("/ws/analytics", get(realtime::ws_analytics))
        .route("/sse/analytics", get(realtime::sse_analytics))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        addr = %listener.local_addr()?,
        loinc_code = %state.config.loinc.code,
        "analytics API listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("analytics API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
