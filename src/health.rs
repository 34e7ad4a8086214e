// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP server for Kubernetes probes and Prometheus metrics.
//!
//! - `/healthz` - Liveness probe, 200 while the process serves requests
//! - `/readyz` - Readiness probe, 200 once the controller is running
//! - `/metrics` - Metrics in Prometheus text format

use crate::constants::{METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH};
use crate::metrics::gather_metrics;
use anyhow::{Context as _, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Shared state of the probe endpoints.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// A state that reports not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

pub(crate) async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(crate) async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

pub(crate) async fn metrics_handler() -> Response {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

/// Routes of the probe and metrics server.
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .with_state(state)
}

/// Serve the probe and metrics endpoints on `port` until the task is dropped.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<()> {
    let addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding health server to {addr}"))?;
    info!(port, "Starting health and metrics server");

    axum::serve(listener, create_router(state))
        .await
        .context("serving health endpoints")
}
