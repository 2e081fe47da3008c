//! Prometheus metrics and the probe/metrics HTTP server.
//!
//! Serves `/healthz` (process is up), `/readyz` (controller finished startup)
//! and `/metrics` (Prometheus text format).

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Controller metrics, cheap to clone
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    blocks_created: IntCounter,
    gc_actions: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("pnap_lb".to_string()), None)?;

        let reconciles = IntCounterVec::new(
            Opts::new("reconcile_total", "Load balancer operations by operation and result"),
            &["operation", "result"],
        )?;
        let blocks_created = IntCounter::new("ip_blocks_created_total", "IP blocks reserved")?;
        let gc_actions = IntCounterVec::new(
            Opts::new("gc_actions_total", "Garbage collector actions by kind"),
            &["action"],
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(blocks_created.clone()))?;
        registry.register(Box::new(gc_actions.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            blocks_created,
            gc_actions,
        })
    }

    /// Count one reconciler operation outcome
    pub fn record_operation<T>(&self, operation: &str, result: &Result<T, ControllerError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        self.reconciles
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_block_created(&self) {
        self.blocks_created.inc();
    }

    /// Count garbage collector actions (`deleted`, `detached`, `skipped`, `failed`)
    pub fn record_gc(&self, action: &str, count: usize) {
        self.gc_actions
            .with_label_values(&[action])
            .inc_by(count as u64);
    }

    #[cfg(test)]
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.reconciles
            .with_label_values(&[operation, outcome])
            .get()
    }

    #[cfg(test)]
    pub fn gc_count(&self, action: &str) -> u64 {
        self.gc_actions.with_label_values(&[action]).get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Validation(format!("metrics are not UTF-8: {}", e)))
    }
}

#[derive(Clone)]
struct ProbeState {
    metrics: Metrics,
    ready: Arc<AtomicBool>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn render_metrics(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Router for the probe and metrics endpoints
pub fn router(metrics: Metrics, ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(ProbeState { metrics, ready })
}

/// Serve probes and metrics until the task is aborted
pub async fn serve(
    addr: SocketAddr,
    metrics: Metrics,
    ready: Arc<AtomicBool>,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving probes and metrics on {}", addr);
    axum::serve(listener, router(metrics, ready)).await?;
    Ok(())
}
