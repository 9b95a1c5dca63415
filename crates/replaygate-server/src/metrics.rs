//! Prometheus counters for HTTP traffic and the idempotency engine.
//!
//! Nothing is pushed; `GET /metrics` renders the recorder's current state.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    /// Labelled by `outcome`.
    pub const IDEMPOTENCY_REQUESTS_TOTAL: &str = "idempotency_requests_total";
    pub const IDEMPOTENCY_CACHE_ENTRIES: &str = "idempotency_cache_entries";
}

/// Installs the global recorder. Every router build calls this, so only the
/// first call installs anything; it returns `false` for the rest.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "prometheus recorder not installed");
            return false;
        }
    };
    if PROMETHEUS_HANDLE.set(handle).is_err() {
        return false;
    }
    tracing::info!("prometheus recorder installed");
    true
}

/// Prometheus text exposition, or `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Counts one HTTP exchange and records its latency.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    let normalized_path = normalize_path(path);

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => normalized_path.clone(),
        "status" => status.to_string(),
        "status_class" => status_class.to_string()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => normalized_path
    )
    .record(duration.as_secs_f64());
}

/// Count one pipeline outcome (`hit`, `miss`, `stored`, `oversize`, ...).
pub fn record_idempotency_outcome(outcome: &'static str) {
    counter!(names::IDEMPOTENCY_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn set_idempotency_cache_entries(count: usize) {
    gauge!(names::IDEMPOTENCY_CACHE_ENTRIES).set(count as f64);
}

/// Replaces id segments with `{id}` to keep label cardinality bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|part| {
            if uuid::Uuid::try_parse(part).is_ok() || part.parse::<u64>().is_ok() {
                "{id}"
            } else {
                part
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
