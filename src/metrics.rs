//! Prometheus metrics for s3handler.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric names recorded by the handler and the ETag cache.
//! Without an installed recorder every macro call is a no-op.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// ETag cache lookups (counter). Labels: result (`hit`, `miss`).
pub const CACHE_LOOKUPS_TOTAL: &str = "s3handler_cache_lookups_total";

/// Backend operations seen by the handler (counter). Labels: operation, status.
pub const BACKEND_OPERATIONS_TOTAL: &str = "s3handler_backend_operations_total";

/// Bytes accepted by successful uploads (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "s3handler_bytes_uploaded_total";

/// Multipart uploads resumed after an interruption (counter).
pub const MULTIPART_RESUMES_TOTAL: &str = "s3handler_multipart_resumes_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(CACHE_LOOKUPS_TOTAL, "ETag cache lookups by result");
    describe_counter!(
        BACKEND_OPERATIONS_TOTAL,
        "Storage backend operations by type and status"
    );
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes uploaded");
    describe_counter!(
        MULTIPART_RESUMES_TOTAL,
        "Multipart uploads resumed after an interruption"
    );
}

/// Render the Prometheus exposition text, if the recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// -- Recording helpers --------------------------------------------------------

/// Count one backend operation and whether it succeeded.
pub fn record_operation(operation: &'static str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!(BACKEND_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

/// Count one cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}
