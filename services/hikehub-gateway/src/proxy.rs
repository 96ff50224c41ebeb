//! Request forwarding through the authenticated client
//!
//! Inbound requests become `ApiRequest`s relative to the API base URL. The
//! caller's `Authorization`, cookies and hop-by-hop headers are dropped: the
//! gateway's session supplies the bearer token and its cookie jar holds the
//! refresh credential. The login and refresh endpoints are never reachable
//! through forwarding; `/session/login` is the only way in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use hikehub_client::{ApiClient, ApiRequest, ApiResponse, Error as ClientError, normalize_path};
use tracing::{error, instrument, warn};

use crate::metrics::record_gateway_error;

/// Inbound body limit
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Owned by the gateway, never taken from the caller
const GATEWAY_OWNED_HEADERS: &[&str] = &["host", "authorization", "cookie", "content-length"];

/// Counters shown on `/health`.
#[derive(Debug, Clone)]
pub struct GatewayStats {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub sessions_ended: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            sessions_ended: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// JSON error body: `{"error":{"type":"...","message":"...","request_id":"req_..."}}`
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Map a client failure onto the gateway's HTTP surface.
///
/// `RequestFailed` is passed through with the upstream status and body.
pub fn client_error_response(err: &ClientError, request_id: &str) -> Response {
    let (status, error_type) = match err {
        ClientError::RequestFailed { status, body } => {
            let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
            return (status, body.clone()).into_response();
        }
        ClientError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
        ClientError::SessionExpired => (StatusCode::UNAUTHORIZED, "session_expired"),
        ClientError::Transport(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
        ClientError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        ClientError::Session(_) | ClientError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    record_gateway_error(error_type);
    error_response(status, error_type, &err.to_string(), request_id)
}

/// Forward an inbound request through the authenticated client.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward_request(
    client: &ApiClient,
    stats: &GatewayStats,
    request: Request<Body>,
    request_id: String,
) -> Response {
    stats.requests_total.fetch_add(1, Ordering::Relaxed);

    let (parts, body) = request.into_parts();
    let path = normalize_path(parts.uri.path());
    if is_reserved(client, &path) {
        stats.errors_total.fetch_add(1, Ordering::Relaxed);
        warn!(path = %path, "refusing to forward to a session endpoint");
        record_gateway_error("reserved_path");
        return error_response(
            StatusCode::FORBIDDEN,
            "reserved_path",
            "session endpoints are not forwarded; use /session/login",
            &request_id,
        );
    }
    let path = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    let mut api_request = ApiRequest::new(parts.method.clone(), path);
    for (name, value) in &parts.headers {
        if forwardable(name.as_str()) {
            api_request = api_request.header(name.clone(), value.clone());
        }
    }

    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            record_gateway_error("invalid_request");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                &request_id,
            );
        }
    };
    if !body_bytes.is_empty() {
        api_request = api_request.body(body_bytes);
    }

    match client.send(&api_request).await {
        Ok(response) => upstream_response(response),
        Err(e) => {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "forwarded call failed");
            client_error_response(&e, &request_id)
        }
    }
}

/// Rebuild the upstream answer. `set-cookie` stays in the gateway's jar.
fn upstream_response(response: ApiResponse) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        let name_str = name.as_str();
        if !is_hop_by_hop(name_str) && !name_str.eq_ignore_ascii_case("set-cookie") {
            headers.append(name.clone(), value.clone());
        }
    }
    (response.status, headers, response.body).into_response()
}

/// `path` must already be normalized.
fn is_reserved(client: &ApiClient, path: &str) -> bool {
    let config = client.config();
    [&config.refresh_path, &config.login_path]
        .iter()
        .any(|endpoint| normalize_path(endpoint) == path)
}

fn forwardable(name: &str) -> bool {
    !is_hop_by_hop(name)
        && !GATEWAY_OWNED_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("Content-Type"));
    }

    #[test]
    fn caller_credentials_are_not_forwarded() {
        assert!(!forwardable("Authorization"));
        assert!(!forwardable("cookie"));
        assert!(!forwardable("Host"));
        assert!(!forwardable("keep-alive"));
        assert!(forwardable("content-type"));
        assert!(forwardable("x-request-source"));
    }

    #[tokio::test]
    async fn session_expired_maps_to_401() {
        let response = client_error_response(&ClientError::SessionExpired, "req_1");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "session_expired");
        assert_eq!(body["error"]["request_id"], "req_1");
    }

    #[tokio::test]
    async fn unauthenticated_maps_to_401() {
        let response = client_error_response(&ClientError::Unauthenticated, "req_2");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["type"], "unauthenticated");
    }

    #[tokio::test]
    async fn transport_maps_to_502() {
        let response =
            client_error_response(&ClientError::Transport("connection refused".into()), "req_3");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "upstream_error");
        assert!(
            body["error"]["message"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
    }

    #[tokio::test]
    async fn request_failed_passes_status_and_body_through() {
        let response = client_error_response(
            &ClientError::RequestFailed {
                status: 409,
                body: r#"{"message":"event is full"}"#.into(),
            },
            "req_4",
        );
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["message"], "event is full");
    }

    #[test]
    fn upstream_set_cookie_is_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("set-cookie", "refreshToken=rt; HttpOnly".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());

        let response = upstream_response(ApiResponse {
            status: StatusCode::OK,
            headers,
            body: bytes::Bytes::from_static(b"{}"),
        });

        assert!(response.headers().get("set-cookie").is_none());
        assert!(response.headers().get("connection").is_none());
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }
}
