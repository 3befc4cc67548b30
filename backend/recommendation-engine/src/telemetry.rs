//! Recommendation engine metrics
//!
//! Prometheus metrics registered on the default registry.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::time::Duration;

static RECOMMENDATIONS_SERVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_lists_served_total",
        "Recommendation lists returned, by strategy that produced them",
        &["strategy"]
    )
    .expect("Failed to register recommendations served metric")
});

static FALLBACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_fallbacks_total",
        "Fallbacks taken by the recommenders",
        &["reason"]
    )
    .expect("Failed to register recommendation fallbacks metric")
});

static IMPRESSIONS_RECORDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "recommendation_impressions_recorded_total",
        "Impressions appended to the impression log"
    )
    .expect("Failed to register impressions recorded metric")
});

static REPORT_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "recommendation_report_duration_seconds",
        "Duration of metrics and bias report computations",
        &["report"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register report duration metric")
});

static ACTIVE_BIAS_ALERTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "recommendation_active_bias_alerts",
        "Number of bias alerts raised by the last composite report"
    )
    .expect("Failed to register active bias alerts metric")
});

/// Record one list returned to a caller
pub fn record_served(strategy: &str) {
    RECOMMENDATIONS_SERVED_TOTAL
        .with_label_values(&[strategy])
        .inc();
}

/// Record a fallback (e.g. "no_preferences", "no_profile", "empty_pool")
pub fn record_fallback(reason: &str) {
    FALLBACKS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_impression() {
    IMPRESSIONS_RECORDED_TOTAL.inc();
}

/// Record how long a report took ("metrics" / "bias")
pub fn record_report_duration(report: &str, duration: Duration) {
    REPORT_DURATION_SECONDS
        .with_label_values(&[report])
        .observe(duration.as_secs_f64());
}

pub fn set_active_bias_alerts(count: i64) {
    ACTIVE_BIAS_ALERTS.set(count);
}
