use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Gauge, HistogramVec,
};

lazy_static! {
    // Admission metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "throttler_requests_total",
        "Total number of counted admission checks",
        &["throttler", "blocked"]
    ).unwrap();

    pub static ref BLOCKS_TOTAL: CounterVec = register_counter_vec!(
        "throttler_blocks_total",
        "Number of times a key was escalated into the blocked state",
        &["throttler"]
    ).unwrap();

    pub static ref FAIL_OPEN_TOTAL: CounterVec = register_counter_vec!(
        "throttler_fail_open_total",
        "Operations that fell back to their safe default after a store error",
        &["operation"]
    ).unwrap();

    pub static ref REFUNDS_TOTAL: Counter = register_counter!(
        "throttler_refunds_total",
        "Hits given back through decrement"
    ).unwrap();

    pub static ref RESETS_TOTAL: Counter = register_counter!(
        "throttler_resets_total",
        "Window counters dropped through reset"
    ).unwrap();

    // Store metrics
    pub static ref STORE_DURATION: HistogramVec = register_histogram_vec!(
        "throttler_store_duration_seconds",
        "Counter store round trip duration in seconds",
        &["command"],
        vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]
    ).unwrap();

    pub static ref STORE_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "throttler_store_errors_total",
        "Total number of counter store errors",
        &["operation"]
    ).unwrap();

    // Config metrics
    pub static ref CONFIG_RELOADS_TOTAL: CounterVec = register_counter_vec!(
        "throttler_config_reloads_total",
        "Total number of configuration reloads",
        &["result"]
    ).unwrap();

    pub static ref ACTIVE_ROUTES: Gauge = register_gauge!(
        "throttler_active_routes",
        "Number of routes with a policy override"
    ).unwrap();
}

pub fn record_request(throttler: &str, blocked: bool) {
    let blocked_str = if blocked { "true" } else { "false" };
    REQUESTS_TOTAL
        .with_label_values(&[throttler, blocked_str])
        .inc();
}

pub fn record_block(throttler: &str) {
    BLOCKS_TOTAL.with_label_values(&[throttler]).inc();
}

pub fn record_fail_open(operation: &str) {
    FAIL_OPEN_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_refund() {
    REFUNDS_TOTAL.inc();
}

pub fn record_reset() {
    RESETS_TOTAL.inc();
}

pub fn record_store_duration(command: &str, duration_secs: f64) {
    STORE_DURATION
        .with_label_values(&[command])
        .observe(duration_secs);
}

pub fn record_store_error(operation: &str) {
    STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn update_route_count(route_count: usize) {
    ACTIVE_ROUTES.set(route_count as f64);
}

pub fn record_config_reload(success: bool) {
    let result = if success { "success" } else { "error" };
    CONFIG_RELOADS_TOTAL
        .with_label_values(&[result])
        .inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, String> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer)
        .map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_recorded_metrics() {
        record_block("metrics-test");
        record_fail_open("increment");

        let text = gather_text().unwrap();
        assert!(text.contains("throttler_blocks_total{throttler=\"metrics-test\"}"));
        assert!(text.contains("throttler_fail_open_total"));
    }
}
