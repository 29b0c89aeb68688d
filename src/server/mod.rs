//! HTTP surface: one extraction endpoint plus liveness and health checks.

pub mod routes;

use crate::sniffer::Sniffer;
use crate::types::{ResponsePolicy, Result};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use routes::{extract_json_handler, extract_query_handler, health_handler, liveness_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sniffer: Arc<Sniffer>,
    pub policy: ResponsePolicy,
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness_handler))
        .route("/health", get(health_handler))
        .route(
            "/extract",
            get(extract_query_handler).post(extract_json_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until SIGINT/SIGTERM. In-flight extractions finish
/// (and close their browsers) before this returns.
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    info!("Extract: GET /extract?url=<page> or POST /extract {{\"url\": \"<page>\"}}");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            tracing::warn!("Failed to register signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Signal received, shutting down");
}
