//! River observability metrics
//!
//! Counters and histograms for connection setup, index provisioning and
//! stored-query registration. No exporter is installed here; the host
//! decides where the `metrics` facade records to.

use std::time::Duration;

/// Record a client connection attempt
pub fn record_connect(mode: &str, ok: bool) {
    metrics::counter!(
        "river_connections_total",
        "mode" => mode.to_string(),
        "status" => if ok { "ok" } else { "error" },
    )
    .increment(1);
}

/// Record an owned resource being released
pub fn record_release(resource: &str) {
    metrics::counter!(
        "river_resources_released_total",
        "resource" => resource.to_string(),
    )
    .increment(1);
}

/// Record a provisioning outcome ("existing", "created", "recreated")
pub fn record_provision(index: &str, outcome: &str, duration: Duration) {
    metrics::counter!(
        "river_provision_total",
        "index" => index.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);

    metrics::histogram!(
        "river_provision_duration_seconds",
        "index" => index.to_string(),
    )
    .record(duration.as_secs_f64());
}

pub fn record_provision_error(index: &str, error_type: &str) {
    metrics::counter!(
        "river_provision_errors_total",
        "index" => index.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record a stored query registration
pub fn record_registration(protocol: &str, index: &str) {
    metrics::counter!(
        "river_registrations_total",
        "protocol" => protocol.to_string(),
        "index" => index.to_string(),
        "status" => "ok",
    )
    .increment(1);
}

/// Record a failed stored query registration
pub fn record_registration_error(protocol: &str, index: &str, error_type: &str) {
    metrics::counter!(
        "river_registrations_total",
        "protocol" => protocol.to_string(),
        "index" => index.to_string(),
        "status" => "error",
    )
    .increment(1);

    metrics::counter!(
        "river_registration_errors_total",
        "protocol" => protocol.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record a completed worker iteration
pub fn record_iteration(outcome: &str) {
    metrics::counter!(
        "river_iterations_total",
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}
