//! Error types for session and token operations

/// Errors from session operations.
///
/// `Clone` because a single refresh outcome is handed to every caller that
/// joined the in-flight exchange.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("refresh credential rejected ({status}): {body}")]
    RefreshRejected { status: u16, body: String },

    #[error("login rejected ({status}): {body}")]
    LoginRejected { status: u16, body: String },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("session has ended")]
    SessionEnded,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
