//! HTTP Server implementation

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use autoreply_api::{create_router, AppState as ApiAppState};
use autoreply_webhook::create_webhook_router;

use crate::app::AppState;

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.server.address();
        let app = build_http_router(&self.state);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;
        info!("HTTP server listening on {}", addr);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}

/// Webhook, management and health routes behind tracing and CORS
pub fn build_http_router(state: &AppState) -> Router {
    let api_router = create_router(ApiAppState::new(state.engine.clone()));
    let webhook_router = create_webhook_router(state.gateway.clone());

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(webhook_router)
        .merge(api_router)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

// Route handlers

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Autoreply",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}
