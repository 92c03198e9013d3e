//! Metrics and telemetry for idstream
//!
//! Prometheus-compatible counters for:
//! - HTTP requests by method and status
//! - HEAD fallback rescues in the resolution chain
//! - Cache lookups by outcome

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// HTTP requests issued by the transport, by method and status class
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "idstream_http_requests_total",
        "Total number of HTTP requests sent to remotes",
        &["method", "status"]
    )
    .unwrap();

    /// Hops rescued by a fallback step after the HEAD request failed
    pub static ref HEAD_FALLBACK_RESCUES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "idstream_head_fallback_rescues_total",
        "Resolution hops rescued by a fallback request",
        &["step"]
    )
    .unwrap();

    /// Cache lookups by namespace and outcome (hit, miss, cooldown, refresh)
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "idstream_cache_lookups_total",
        "Cache lookups by outcome",
        &["namespace", "outcome"]
    )
    .unwrap();
}

/// Record an HTTP request
pub fn record_http_request(method: &str, status: Option<u16>) {
    let status = match status {
        Some(s) => format!("{}xx", s / 100),
        None => "error".to_string(),
    };
    HTTP_REQUESTS_TOTAL.with_label_values(&[method, &status]).inc();
}

/// Record a rescued resolution hop
pub fn record_head_rescue(step: &str) {
    HEAD_FALLBACK_RESCUES_TOTAL.with_label_values(&[step]).inc();
}

/// Record a cache lookup
pub fn record_cache_lookup(namespace: &str, outcome: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[namespace, outcome]).inc();
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_counter_increments() {
        let before = CACHE_LOOKUPS_TOTAL
            .with_label_values(&["metrics_test", "hit"])
            .get();
        record_cache_lookup("metrics_test", "hit");
        let after = CACHE_LOOKUPS_TOTAL
            .with_label_values(&["metrics_test", "hit"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_export_contains_registered_metrics() {
        record_http_request("HEAD", Some(301));
        let text = export_metrics().unwrap();
        assert!(text.contains("idstream_http_requests_total"));
    }
}
