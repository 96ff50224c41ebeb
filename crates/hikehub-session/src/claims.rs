//! Access token expiry detection
//!
//! The access token is a JWT. The client never verifies its signature (the
//! backend does); it only reads the `exp` claim from the payload segment to
//! decide whether the token can be sent as-is or must be refreshed first.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct Claims {
    /// Seconds since the Unix epoch
    exp: Option<u64>,
}

/// What the stored token slot holds, relative to the current time.
#[derive(Debug, Clone)]
pub enum TokenStatus {
    /// Nothing stored and no session has been revoked
    Missing,
    /// Nothing stored because the last refresh exchange was refused
    Revoked,
    /// Token present and `now + leeway < exp`
    Valid(Secret<String>),
    /// Token present but past its `exp` (or unreadable)
    Expired(Secret<String>),
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Read the `exp` claim from a JWT without verifying it.
///
/// Returns `Ok(None)` for a well-formed token that carries no expiry.
pub fn decode_expiry(token: &str) -> Result<Option<u64>> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_header), Some(payload)) if !payload.is_empty() => payload,
        _ => return Err(Error::InvalidToken("missing payload segment".into())),
    };

    // Some issuers pad their segments; the JWT encoding itself never does.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::InvalidToken(format!("payload is not base64url: {e}")))?;

    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidToken(format!("payload is not a claims object: {e}")))?;

    Ok(claims.exp)
}

/// Classify a stored token against `now` (unix seconds).
///
/// A token without `exp` never expires. A token whose payload cannot be read
/// is reported as expired so the refresh path replaces it instead of sending
/// garbage to the backend.
pub fn classify_token(token: Secret<String>, now: u64, leeway_secs: u64) -> TokenStatus {
    match decode_expiry(token.expose()) {
        Ok(Some(exp)) if now.saturating_add(leeway_secs) < exp => TokenStatus::Valid(token),
        Ok(Some(_)) => TokenStatus::Expired(token),
        Ok(None) => TokenStatus::Valid(token),
        Err(e) => {
            warn!(error = %e, "stored access token is unreadable, treating as expired");
            TokenStatus::Expired(token)
        }
    }
}
