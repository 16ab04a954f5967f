//! Health check endpoints
//!
//! Provides Kubernetes-style health probes:
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /ready, /readyz - Readiness probe (is the service ready for traffic?)
//! - /version - Build information for deployment verification
//!
//! Liveness returns 200 whenever the process is up. Readiness pings
//! MongoDB; a failed ping returns 503 so load balancers stop routing
//! traffic here before requests start failing.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

/// Health response body
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    /// 'online' or 'degraded'
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Whether MongoDB answered the last ping
    pub database: DatabaseHealth,
    /// Current timestamp
    pub timestamp: String,
    /// Node identifier
    pub node_id: String,
}

/// Database connectivity details
#[derive(Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    /// Error message when the ping failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn build_health_response(state: &AppState, db_error: Option<String>) -> HealthResponse {
    let connected = db_error.is_none();
    HealthResponse {
        healthy: true,
        status: if connected { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database: DatabaseHealth {
            connected,
            error: db_error,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
        node_id: state.args.node_id.to_string(),
    }
}

fn json(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Handle liveness probe (/health, /healthz)
///
/// Always 200 while the process runs; database status is informational.
pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let db_error = state.mongo.ping().await.err().map(|e| e.to_string());
    let response = build_health_response(&state, db_error);

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());
    json(StatusCode::OK, body)
}

/// Handle readiness probe (/ready, /readyz)
///
/// 200 only when MongoDB answers; every endpoint needs the database.
pub async fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let db_error = state.mongo.ping().await.err().map(|e| e.to_string());
    let is_ready = db_error.is_none();
    let response = build_health_response(&state, db_error);

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"Serialization failed"}"#.to_string());

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json(status, body)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    /// Cargo package version
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    /// Git commit hash (full)
    pub commit_full: &'static str,
    /// Build timestamp
    pub build_time: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "gatehouse",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown","commit":"unknown"}"#.to_string());
    json(StatusCode::OK, body)
}
