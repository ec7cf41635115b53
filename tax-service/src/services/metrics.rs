//! Prometheus metrics for tax-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};

/// Calculation counter by outcome.
pub static CALCULATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tax_calculations_total",
        "Total number of tax calculations by status",
        &["status"] // success, failure
    )
    .expect("Failed to register calculations_total")
});

/// Finalization counter by outcome.
pub static FINALIZATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tax_finalizations_total",
        "Total number of estimation finalizations by status",
        &["status"]
    )
    .expect("Failed to register finalizations_total")
});

/// Inputs that matched no bracket and contributed zero tax.
pub static BRACKET_MISSES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tax_bracket_misses_total",
        "Total number of bracket lookups that matched no bracket",
        &["kind"]
    )
    .expect("Failed to register bracket_misses_total")
});

pub static AUDIT_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "tax_audit_failures_total",
        "Total number of audit entries that could not be recorded"
    )
    .expect("Failed to register audit_failures_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tax_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tax_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&CALCULATIONS_TOTAL);
    Lazy::force(&FINALIZATIONS_TOTAL);
    Lazy::force(&BRACKET_MISSES_TOTAL);
    Lazy::force(&AUDIT_FAILURES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
