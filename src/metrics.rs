/// Prometheus metrics for the moderation server
///
/// Counters for filter verdicts, queue decisions, penalties and intake, plus
/// the current filter catalog generation.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Filter verdicts by chosen action
    pub static ref FILTER_VERDICTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "moderation_filter_verdicts_total",
        "Total number of filter verdicts by action",
        &["action"]
    )
    .unwrap();

    /// Review queue resolutions by decision
    pub static ref QUEUE_RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "moderation_queue_resolutions_total",
        "Total number of review queue resolutions by decision",
        &["decision"]
    )
    .unwrap();

    /// Penalties applied by type
    pub static ref PENALTIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "moderation_penalties_total",
        "Total number of user penalties applied by type",
        &["type"]
    )
    .unwrap();

    /// Reports filed by category
    pub static ref REPORTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "moderation_reports_total",
        "Total number of content reports by category",
        &["category"]
    )
    .unwrap();

    /// Flags filed by type
    pub static ref FLAGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "moderation_flags_total",
        "Total number of content flags by type",
        &["type"]
    )
    .unwrap();

    /// Current rule/word catalog generation
    pub static ref RULE_CACHE_GENERATION: IntGauge = register_int_gauge!(
        "moderation_rule_cache_generation",
        "Generation counter of the filter rule and prohibited word catalog"
    )
    .unwrap();
}

/// Render all registered metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
