//! Prometheus metrics for the HTTP surface and the registry.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, matched path, status
//! - `http_request_duration_seconds` (histogram): handler latency, same labels
//! - `user_operations_total` (counter): registry operations by outcome
//! - `user_registry_size` (gauge): number of stored users
//!
//! The recorder is process-wide, so every server in a process shares one
//! exposition handle.

use crate::error::Result;
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::Mutex;
use std::time::Instant;

const LATENCY_BUCKETS: [f64; 11] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the global Prometheus recorder, or returns the one already installed.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let mut slot = HANDLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            &LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    *slot = Some(handle.clone());
    Ok(handle)
}

/// Renders the current exposition text.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.run_upkeep();
    handle.render()
}

/// Middleware timing every routed request.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => req.uri().path().to_string(),
    };

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    let labels = [("method", method), ("path", path), ("status", status)];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

pub fn record_operation(operation: &'static str, outcome: &'static str) {
    metrics::counter!("user_operations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}

pub fn record_registry_size(size: usize) {
    metrics::gauge!("user_registry_size").set(size as f64);
}
