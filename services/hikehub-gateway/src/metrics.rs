//! Prometheus metrics exposition
//!
//! The recorder installed here also receives what the library crates emit:
//!
//! - `hikehub_client_requests_total` (counter): labels `status`, `method`
//! - `hikehub_client_request_duration_seconds` (histogram): label `status`
//! - `hikehub_session_refresh_total` (counter): label `outcome`
//! - `hikehub_session_ended_total` (counter): label `reason`
//!
//! plus the gateway's own:
//!
//! - `hikehub_gateway_errors_total` (counter): label `error_type`

use hikehub_client::metrics::REQUEST_DURATION_METRIC;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Buckets from 5ms to 60s; a call may include a refresh and a retry.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(REQUEST_DURATION_METRIC.to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a request the gateway answered with an error of its own.
pub fn record_gateway_error(error_type: &'static str) {
    metrics::counter!("hikehub_gateway_errors_total", "error_type" => error_type).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder, so tests don't fight over the global singleton.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_without_recorder_is_noop() {
        record_gateway_error("upstream_error");
    }

    #[test]
    fn gateway_errors_carry_error_type() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_gateway_error("session_expired");
        record_gateway_error("upstream_error");

        let output = handle.render();
        assert!(output.contains("hikehub_gateway_errors_total"));
        assert!(output.contains("error_type=\"session_expired\""));
        assert!(output.contains("error_type=\"upstream_error\""));
    }

    #[test]
    fn client_duration_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!(REQUEST_DURATION_METRIC, "status" => "200").record(0.003);

        let output = handle.render();
        assert!(output.contains("hikehub_client_request_duration_seconds_bucket"));
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"60\""));
        assert!(output.contains("le=\"+Inf\""));
    }
}
