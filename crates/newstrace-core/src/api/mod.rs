//! Metrics exposition and health endpoint
//!
//! Every agent process serves its own scrape surface; fleet-wide views are
//! assembled by whoever scrapes the fleet.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};
use crate::monitoring::MetricsCollector;

/// Shared state for the exposition routes
#[derive(Clone)]
pub struct AppState {
    /// Collector whose recorder is rendered at /metrics
    pub metrics: Arc<MetricsCollector>,
}

/// Create the exposition router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render_prometheus() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "exposition recorder not installed in this process",
        )
            .into_response(),
    }
}

/// HTTP server for the per-process scrape endpoint
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a server exposing the given collector
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            state: AppState { metrics },
        }
    }

    /// Bind and serve until the task is aborted
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = create_router(self.state);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::internal(format!("cannot bind {addr}: {e}")))?;

        info!("Exposition server listening on {addr}");

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(())
    }
}
