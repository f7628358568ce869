//! Prometheus metrics for storage latency and the audit trail.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "user_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Audit records by entity type and outcome (written, failed, dropped)
pub static AUDIT_RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "user_audit_records_total",
            "Audit records by entity type and outcome"
        ),
        &["entity_type", "outcome"]
    )
    .expect("Failed to register AUDIT_RECORDS_TOTAL")
});

pub fn record_audit_outcome(entity_type: &str, outcome: &str) {
    AUDIT_RECORDS_TOTAL
        .with_label_values(&[entity_type, outcome])
        .inc();
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_outcomes_are_exported() {
        record_audit_outcome("metrics_test", "written");
        let text = gather_metrics();
        assert!(text.contains("user_audit_records_total"));
        assert!(text.contains("metrics_test"));
    }
}
