//! Metrics definitions for the Audon service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `audon_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code: room ids and user ids never appear as label
//! values, dynamic path segments are normalized before recording.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("audon_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("audon_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        // Live service calls cross the network to the media cluster
        .set_buckets_for_metric(
            Matcher::Prefix("audon_live_request".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set live request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `audon_http_requests_total`, `audon_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("audon_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("audon_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/metrics" | "/app/webhook" | "/app/verify" | "/api/room" | "/api/leave"
        | "/api/status" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Replace room ids, user ids and handles with placeholders.
fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    match parts.as_slice() {
        ["", "app", "preview", _] => "/app/preview/{id}".to_string(),
        ["", "api", "user", _] => "/api/user/{id}".to_string(),
        ["", "api", "live", _] => "/api/live/{webfinger}".to_string(),
        ["", "api", "room", _] => "/api/room/{id}".to_string(),
        ["", "api", "room", _, "join"] => "/api/room/{id}/join".to_string(),
        ["", "api", "room", _, list @ ("speakers" | "cohosts" | "kicked"), _] => {
            format!("/api/room/{{id}}/{list}/{{user}}")
        }
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution.
///
/// Metric: `audon_db_query_duration_seconds`, `audon_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("audon_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("audon_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Live Service Metrics
// ============================================================================

/// Record a call to the live media service.
///
/// Metric: `audon_live_request_duration_seconds`, `audon_live_requests_total`
/// Labels: `method`, `status`
pub fn record_live_request(method: &str, status: &str, duration: Duration) {
    histogram!("audon_live_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("audon_live_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Room Session Metrics
// ============================================================================

/// Record a room lifecycle transition.
///
/// Metric: `audon_room_transitions_total`
/// Labels: `transition` (created, provisioned, ended, gc_deleted), `trigger` (api, webhook, reaper)
pub fn record_room_transition(transition: &str, trigger: &str) {
    counter!("audon_room_transitions_total",
        "transition" => transition.to_string(),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

/// Record an admission decision.
///
/// Metric: `audon_admissions_total`
/// Labels: `outcome` (listener, speaker, denied), `reason`
pub fn record_admission(outcome: &str, reason: &str) {
    counter!("audon_admissions_total",
        "outcome" => outcome.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a role mutation.
///
/// Metric: `audon_role_changes_total`
/// Labels: `operation` (promote, demote, add_cohost, kick), `status`
pub fn record_role_change(operation: &str, status: &str) {
    counter!("audon_role_changes_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a webhook event and how it was handled.
///
/// Metric: `audon_webhook_events_total`
/// Labels: `event`, `outcome`
pub fn record_webhook_event(event: &str, outcome: &str) {
    let event = match event {
        "room_started" | "room_finished" | "participant_joined" | "participant_left" => event,
        _ => "other",
    };
    counter!("audon_webhook_events_total",
        "event" => event.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an avatar restore attempt.
///
/// Metric: `audon_avatar_restores_total`
/// Labels: `status` (restored, skipped, error)
pub fn record_avatar_restore(status: &str) {
    counter!("audon_avatar_restores_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a failed second write after the durable write succeeded.
///
/// Metric: `audon_dual_write_failures_total`
/// Labels: `operation`
pub fn record_dual_write_failure(operation: &str) {
    counter!("audon_dual_write_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}
