//! Liveness, readiness and metrics endpoints.

use std::{fmt, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cadence_core::ports::CampaignStore;

#[derive(Clone)]
pub struct AdminState {
    store: Arc<dyn CampaignStore>,
    metrics: Option<PrometheusHandle>,
}

impl fmt::Debug for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminState")
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl AdminState {
    pub fn new(store: Arc<dyn CampaignStore>, metrics: Option<PrometheusHandle>) -> Self {
        Self { store, metrics }
    }
}

pub fn router(state: AdminState, metrics_path: &str) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .route(metrics_path, get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the admin endpoints until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
    metrics_path: String,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin listener on {addr}"))?;
    info!(target: "cadence::runtime", %addr, "admin endpoints listening");

    axum::serve(listener, router(state, &metrics_path))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("admin server failed")
}

async fn ping_handler() -> &'static str {
    "pong"
}

async fn health_handler(State(state): State<AdminState>) -> (StatusCode, Json<Value>) {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(err) => {
            warn!(target: "cadence::runtime", error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "error": err.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}

async fn metrics_handler(State(state): State<AdminState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use cadence_core::infra::memory::InMemoryCampaignStore;
    use tower::ServiceExt;

    fn app() -> Router {
        router(AdminState::new(
            Arc::new(InMemoryCampaignStore::new()),
            None,
        ), "/metrics")
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let (status, body) = get(app(), "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"pong");
    }

    #[tokio::test]
    async fn health_checks_the_store() {
        let (status, body) = get(app(), "/health").await;
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let response = app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
