//! Prometheus metrics for the grid client
//!
//! Only operation names and outcome kinds are used as labels, never record
//! names, values or handles.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const OP_INITIALIZE: &str = "initialize";
pub const OP_REFRESH: &str = "refresh";
pub const OP_CREATE: &str = "create";
pub const OP_VERIFY: &str = "verify";

pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_ALREADY_VERIFIED: &str = "already_verified";

pub fn record_operation(op: &'static str, outcome: &str, duration: Duration) {
    counter!("grid_operations_total", "op" => op, "outcome" => outcome.to_string()).increment(1);
    histogram!("grid_operation_duration_seconds", "op" => op, "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_operation_start(op: &'static str) {
    gauge!("grid_operations_in_flight", "op" => op).increment(1.0);
}

pub fn record_operation_end(op: &'static str) {
    gauge!("grid_operations_in_flight", "op" => op).decrement(1.0);
}

pub fn record_skipped_record() {
    counter!("grid_refresh_skipped_records_total").increment(1);
}

pub fn set_records_loaded(total: usize, verified: usize) {
    gauge!("grid_records_loaded").set(total as f64);
    gauge!("grid_records_verified").set(verified as f64);
}

pub fn init_prometheus_recorder() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    Ok(builder.install_recorder()?)
}
