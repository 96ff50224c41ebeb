//! Client error taxonomy

use thiserror::Error;

/// Outcome of a failed logical call.
///
/// Credential problems are resolved locally up to one retry; anything left
/// over surfaces as one of these.
#[derive(Error, Debug)]
pub enum Error {
    /// No access token was stored when the call started
    #[error("not authenticated, log in first")]
    Unauthenticated,

    /// The token could not be renewed, or was rejected again after renewal
    #[error("session expired, log in again")]
    SessionExpired,

    /// Any other non-2xx answer, passed through unchanged
    #[error("request failed ({status}): {body}")]
    RequestFailed { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal client error: {0}")]
    Internal(String),

    #[error(transparent)]
    Session(#[from] hikehub_session::Error),
}

impl Error {
    /// Label for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Unauthenticated => "unauthenticated",
            Error::SessionExpired => "session_expired",
            Error::RequestFailed { .. } => "request_failed",
            Error::Transport(_) => "transport",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Internal(_) => "internal",
            Error::Session(_) => "session",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

/// Result alias using client Error
pub type Result<T> = std::result::Result<T, Error>;
