//! Client call metrics
//!
//! - `hikehub_client_requests_total` (counter): labels `status`, `method`
//! - `hikehub_client_request_duration_seconds` (histogram): label `status`
//!
//! `status` is the HTTP status for answered calls and the error label
//! (`unauthenticated`, `session_expired`, `transport`, ...) otherwise.
//! Refresh and session-end counters are recorded by the session manager.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::request::ApiResponse;

/// Histogram name, exported so recorders can configure buckets for it.
pub const REQUEST_DURATION_METRIC: &str = "hikehub_client_request_duration_seconds";

/// Record one finished logical call, retries included.
pub fn record_call(method: &str, outcome: &Result<ApiResponse>, elapsed: Duration) {
    let status = status_label(outcome);
    metrics::counter!("hikehub_client_requests_total", "status" => status.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_METRIC, "status" => status).record(elapsed.as_secs_f64());
}

fn status_label(outcome: &Result<ApiResponse>) -> String {
    match outcome {
        Ok(response) => response.status.as_u16().to_string(),
        Err(Error::RequestFailed { status, .. }) => status.to_string(),
        Err(e) => e.label().to_string(),
    }
}
