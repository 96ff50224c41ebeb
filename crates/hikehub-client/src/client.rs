//! Authenticated API client
//!
//! Reads the stored token, attaches it, dispatches, and on expiry or
//! credential rejection renews it through the shared session manager. The
//! per-call decisions live in [`crate::call::handle_event`]; this module only
//! performs the I/O each action names.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Secret;
use hikehub_session::{
    DEFAULT_BASE_URL, EndReason, HttpRefresher, LOGIN_PATH, REFRESH_PATH, SessionConfig,
    SessionManager, SessionStorage,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::call::{self, CallAction, CallEvent, CallState};
use crate::classify::{DEFAULT_REJECTION_STATUSES, classify_status};
use crate::error::{Error, Result};
use crate::metrics;
use crate::request::{ApiRequest, ApiResponse};

/// Where the API lives and which of its answers mean "token rejected".
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub refresh_path: String,
    pub login_path: String,
    pub rejection_statuses: Vec<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_path: REFRESH_PATH.to_string(),
            login_path: LOGIN_PATH.to_string(),
            rejection_statuses: DEFAULT_REJECTION_STATUSES.to_vec(),
        }
    }
}

/// Build the HTTP client shared by login, refresh and regular calls.
///
/// The cookie store holds the refresh credential set at login, so the same
/// instance must be handed to [`ApiClient`] and its refresher.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .cookie_store(true)
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))
}

/// Cheaply cloneable client. All clones share one session.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    session: SessionManager,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, config: ClientConfig, session: SessionManager) -> Self {
        Self {
            http,
            config: Arc::new(config),
            session,
        }
    }

    /// Wire a session manager whose refresher calls this API's refresh
    /// endpoint over `http`.
    pub fn with_storage(
        http: reqwest::Client,
        config: ClientConfig,
        storage: Arc<dyn SessionStorage>,
        session_config: SessionConfig,
    ) -> Self {
        let refresher = HttpRefresher::new(
            http.clone(),
            join_url(&config.base_url, &config.refresh_path),
        );
        let session = SessionManager::new(storage, Arc::new(refresher), session_config);
        Self::new(http, config, session)
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint_url(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    /// Issue one logical call.
    ///
    /// At most one refresh exchange is triggered per call, and at most one
    /// retry follows it. `request` is never modified.
    ///
    /// A request addressed to the refresh endpoint is not dispatched as-is:
    /// it shares the session's refresh exchange, the new token is stored, and
    /// the call is answered `200 {"token": "..."}`.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.path()))]
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let started = Instant::now();
        let outcome = self.run(request).await;
        metrics::record_call(request.method().as_str(), &outcome, started.elapsed());

        match &outcome {
            Ok(response) => debug!(status = response.status.as_u16(), "call completed"),
            Err(e) => warn!(error = %e, kind = e.label(), "call failed"),
        }
        outcome
    }

    /// `send` and deserialize the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        self.send(request).await?.json()
    }

    /// Exchange credentials for a token and store it. Sets the refresh cookie
    /// in the shared cookie jar as a side effect.
    pub async fn login<T: Serialize + ?Sized>(&self, credentials: &T) -> Result<()> {
        let url = self.endpoint_url(&self.config.login_path);
        let response = hikehub_session::login(&self.http, &url, credentials)
            .await
            .map_err(|e| match e {
                hikehub_session::Error::LoginRejected { status, body } => {
                    Error::RequestFailed { status, body }
                }
                other => Error::Session(other),
            })?;

        self.session.set_token(Secret::new(response.token)).await?;
        info!("logged in");
        Ok(())
    }

    /// Clear the token and notify session-ended observers.
    pub async fn logout(&self) {
        self.session.end_session(EndReason::LoggedOut).await;
    }

    async fn run(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut state = CallState::Init;
        let status = self.session.token_status().await?;
        let mut event = if request.targets(&self.config.refresh_path) {
            CallEvent::RenewalRequested(status)
        } else {
            CallEvent::TokenLoaded(status)
        };
        let mut last_response: Option<reqwest::Response> = None;

        loop {
            let (next, action) = call::handle_event(state, event);
            state = next;

            event = match action {
                CallAction::Dispatch { token, attempt } => {
                    let response = self.dispatch(request, &token, attempt).await?;
                    let class = classify_status(
                        response.status().as_u16(),
                        &self.config.rejection_statuses,
                    );
                    debug!(attempt, status = response.status().as_u16(), ?class, "response received");
                    last_response = Some(response);
                    CallEvent::Responded(class)
                }
                CallAction::Refresh { stale } => match self.session.refresh_once(&stale).await {
                    Ok(token) => CallEvent::RefreshSucceeded(token),
                    Err(e) => {
                        debug!(error = %e, "refresh did not produce a token");
                        CallEvent::RefreshFailed
                    }
                },
                CallAction::Complete => {
                    let response = take_response(&mut last_response)?;
                    return ApiResponse::read(response).await;
                }
                CallAction::Reject => {
                    let response = take_response(&mut last_response)?;
                    return Err(rejection(response).await);
                }
                CallAction::Renewed(token) => return renewed_response(&token),
                CallAction::EndSession { reason, failure } => {
                    self.session.end_session(reason).await;
                    return Err(failure.into());
                }
                CallAction::Fail(failure) => return Err(failure.into()),
                CallAction::None => {
                    return Err(Error::Internal(format!(
                        "call stalled in state {state:?}"
                    )));
                }
            };
        }
    }

    /// Send one attempt. The caller's headers are copied; only
    /// `Authorization` is replaced.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: &Secret<String>,
        attempt: u32,
    ) -> Result<reqwest::Response> {
        let mut headers = request.headers().clone();
        let mut value = HeaderValue::from_str(&token.bearer()).map_err(|_| {
            Error::InvalidRequest("access token is not a valid header value".into())
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let mut builder = self
            .http
            .request(request.method().clone(), self.endpoint_url(request.path()))
            .headers(headers);
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        debug!(attempt, "dispatching request");
        Ok(builder.send().await?)
    }
}

fn take_response(slot: &mut Option<reqwest::Response>) -> Result<reqwest::Response> {
    slot.take()
        .ok_or_else(|| Error::Internal("no response to hand back".into()))
}

async fn rejection(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Error::RequestFailed { status, body }
}

/// Same body shape the refresh endpoint answers with.
fn renewed_response(token: &Secret<String>) -> Result<ApiResponse> {
    let body = serde_json::to_vec(&serde_json::json!({ "token": token.expose() }))
        .map_err(|e| Error::Internal(format!("encoding renewed token: {e}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(ApiResponse {
        status: reqwest::StatusCode::OK,
        headers,
        body: body.into(),
    })
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
