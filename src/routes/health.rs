//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - liveness (is the service running?)
//! - /ready, /readyz - readiness (does MongoDB answer?)

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

use super::json_response;

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    status: &'static str,
    version: &'static str,
    node_id: String,
    connections: usize,
    fanout_enabled: bool,
}

/// Liveness probe
pub fn health_check(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            healthy: true,
            status: "online",
            version: env!("CARGO_PKG_VERSION"),
            node_id: state.args.node_id.to_string(),
            connections: state.relay.registry().connection_count(),
            fanout_enabled: state.fanout.is_some(),
        },
    )
}

/// Readiness probe: ready only when MongoDB answers a ping
pub async fn readiness_check(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    match state.mongo.ping().await {
        Ok(()) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "ready": true }),
        ),
        Err(e) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({ "ready": false, "error": e.to_string() }),
        ),
    }
}

/// Version info for deployment verification
pub fn version_info() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}
