// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health, readiness and metrics surface for container probes.
//!
//! Handlers read from a snapshot provider; nothing here holds a reference
//! back to the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::queue::EventQueue;
use crate::stream::StreamSupervisor;

/// Read-only view handed to the health surface.
pub struct HealthState {
    pub ready: AtomicBool,
    pub agent_id: String,
    pub version: String,
    pub queue: Arc<EventQueue>,
    pub streams: Arc<StreamSupervisor>,
}

/// Build the axum `Router` with all probe routes.
pub fn build_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /health` — liveness: 200 while the process runs.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// `GET /ready` — readiness: 200 once the orchestrator is running.
async fn ready(State(s): State<Arc<HealthState>>) -> impl IntoResponse {
    if s.ready.load(Ordering::Acquire) {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "status": "not_ready" })))
    }
}

/// `GET /metrics` — Prometheus text exposition.
async fn metrics(State(s): State<Arc<HealthState>>) -> impl IntoResponse {
    let mut lines = Vec::new();

    match s.queue.stats() {
        Ok(queue) => {
            lines.push(format!("edge_agent_events_pending {}", queue.pending));
            lines.push(format!("edge_agent_events_processed_total {}", queue.total_processed));
            lines.push(format!("edge_agent_events_failed {}", queue.failed));
        }
        Err(e) => tracing::warn!(err = %e, "queue stats unavailable for metrics"),
    }

    lines.push(format!("edge_agent_cameras_active {}", s.streams.active_camera_count().await));

    for stream in s.streams.stats_snapshot().await {
        let id = stream.camera_id;
        lines.push(format!(
            "edge_agent_camera_frames_processed{{camera_id=\"{id}\"}} {}",
            stream.frames_processed
        ));
        lines.push(format!(
            "edge_agent_camera_detections{{camera_id=\"{id}\"}} {}",
            stream.detections_count
        ));
        lines.push(format!(
            "edge_agent_camera_errors{{camera_id=\"{id}\"}} {}",
            stream.errors_count
        ));
        lines.push(format!(
            "edge_agent_camera_connected{{camera_id=\"{id}\"}} {}",
            i32::from(stream.is_connected)
        ));
    }

    let mut body = lines.join("\n");
    body.push('\n');
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// `GET /status` — JSON snapshot of agent, queue and stream state.
async fn status(State(s): State<Arc<HealthState>>) -> impl IntoResponse {
    let queue = s.queue.stats().ok();
    let streams = s.streams.stats_snapshot().await;
    let active = s.streams.active_camera_count().await;
    let total = s.streams.stream_count().await;

    Json(serde_json::json!({
        "status": if s.ready.load(Ordering::Acquire) { "running" } else { "stopped" },
        "version": s.version,
        "agent_id": s.agent_id,
        "queue": queue,
        "cameras": {
            "active": active,
            "total": total,
            "streams": streams,
        },
    }))
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
