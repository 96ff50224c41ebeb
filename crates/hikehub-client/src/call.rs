//! Per-call state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `ApiClient::send` executes the I/O implied by each action.
//!
//! ```text
//! Init ──TokenLoaded(Valid)──▶ Dispatched ──Success──▶ Success
//!  │                              │ │
//!  │                              │ └──Failed──▶ Failed
//!  │                              └──CredentialRejected (budget left)──▶ Refreshing
//!  ├──TokenLoaded(Expired)──▶ Refreshing ──RefreshSucceeded──▶ Dispatched
//!  │                               └──RefreshFailed──▶ LoggedOut
//!  └──RenewalRequested──▶ Renewing ──RefreshSucceeded──▶ Success
//! ```
//!
//! A call addressed to the refresh endpoint never reaches the network on its
//! own: it joins the session's single refresh exchange (`Renewing`) and is
//! answered with the token that exchange produced.
//!
//! The refresh budget is carried in the state (`refreshes`), not marked on
//! the request, so a logical call can never loop.

use common::Secret;
use hikehub_session::{EndReason, TokenStatus};

use crate::classify::ResponseClass;
use crate::error::Error;

/// Refresh exchanges one logical call may trigger, proactive or reactive.
pub const MAX_REFRESHES_PER_CALL: u32 = 1;

/// Call states.
#[derive(Debug)]
pub enum CallState {
    /// Token not read yet
    Init,
    /// Request sent, awaiting classification of the response
    Dispatched {
        attempt: u32,
        refreshes: u32,
        token: Secret<String>,
    },
    /// Waiting on the shared refresh exchange
    Refreshing { attempt: u32, refreshes: u32 },
    /// Refresh endpoint requested explicitly, waiting on the shared exchange
    Renewing,
    Success,
    /// Non-credential failure passed through to the caller
    Failed,
    /// Session ended while serving this call
    LoggedOut,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Success | CallState::Failed | CallState::LoggedOut
        )
    }
}

/// Events that drive a call forward.
#[derive(Debug)]
pub enum CallEvent {
    /// Stored token read and classified
    TokenLoaded(TokenStatus),
    /// The request targets the refresh endpoint; carries the stored token
    RenewalRequested(TokenStatus),
    /// Dispatched request answered
    Responded(ResponseClass),
    RefreshSucceeded(Secret<String>),
    RefreshFailed,
}

/// Why a call ended in `LoggedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailure {
    Unauthenticated,
    SessionExpired,
}

impl From<CallFailure> for Error {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::Unauthenticated => Error::Unauthenticated,
            CallFailure::SessionExpired => Error::SessionExpired,
        }
    }
}

/// Actions the caller should execute after a transition.
#[derive(Debug)]
pub enum CallAction {
    /// Send the request with `Authorization: Bearer <token>`
    Dispatch {
        token: Secret<String>,
        attempt: u32,
    },
    /// Obtain a token newer than `stale` through the session manager
    Refresh { stale: Secret<String> },
    /// Hand the 2xx response to the caller
    Complete,
    /// Surface the non-2xx response as `RequestFailed`
    Reject,
    /// Answer a refresh-endpoint call with the session's new token
    Renewed(Secret<String>),
    /// End the session, then fail the call
    EndSession {
        reason: EndReason,
        failure: CallFailure,
    },
    /// Fail the call; the session was already ended by the refresh path
    Fail(CallFailure),
    /// No-op
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: CallState, event: CallEvent) -> (CallState, CallAction) {
    match (state, event) {
        // --- Init ---
        (
            CallState::Init,
            CallEvent::RenewalRequested(TokenStatus::Valid(stale) | TokenStatus::Expired(stale)),
        ) => (CallState::Renewing, CallAction::Refresh { stale }),

        (CallState::Init, CallEvent::RenewalRequested(TokenStatus::Missing)) => (
            CallState::LoggedOut,
            CallAction::Fail(CallFailure::Unauthenticated),
        ),

        (CallState::Init, CallEvent::RenewalRequested(TokenStatus::Revoked)) => (
            CallState::LoggedOut,
            CallAction::Fail(CallFailure::SessionExpired),
        ),

        (CallState::Init, CallEvent::TokenLoaded(TokenStatus::Missing)) => (
            CallState::LoggedOut,
            CallAction::EndSession {
                reason: EndReason::NoCredential,
                failure: CallFailure::Unauthenticated,
            },
        ),

        // Already ended by the failed refresh; observers heard about it then
        (CallState::Init, CallEvent::TokenLoaded(TokenStatus::Revoked)) => (
            CallState::LoggedOut,
            CallAction::Fail(CallFailure::SessionExpired),
        ),

        (CallState::Init, CallEvent::TokenLoaded(TokenStatus::Valid(token))) => (
            CallState::Dispatched {
                attempt: 0,
                refreshes: 0,
                token: token.clone(),
            },
            CallAction::Dispatch { token, attempt: 0 },
        ),

        (CallState::Init, CallEvent::TokenLoaded(TokenStatus::Expired(stale))) => (
            CallState::Refreshing {
                attempt: 0,
                refreshes: 0,
            },
            CallAction::Refresh { stale },
        ),

        // --- Dispatched ---
        (CallState::Dispatched { .. }, CallEvent::Responded(ResponseClass::Success)) => {
            (CallState::Success, CallAction::Complete)
        }

        (CallState::Dispatched { .. }, CallEvent::Responded(ResponseClass::Failed)) => {
            (CallState::Failed, CallAction::Reject)
        }

        (
            CallState::Dispatched {
                attempt,
                refreshes,
                token: stale,
            },
            CallEvent::Responded(ResponseClass::CredentialRejected),
        ) if refreshes < MAX_REFRESHES_PER_CALL => (
            CallState::Refreshing {
                attempt: attempt + 1,
                refreshes,
            },
            CallAction::Refresh { stale },
        ),

        (CallState::Dispatched { .. }, CallEvent::Responded(ResponseClass::CredentialRejected)) => (
            CallState::LoggedOut,
            CallAction::EndSession {
                reason: EndReason::RejectedAfterRefresh,
                failure: CallFailure::SessionExpired,
            },
        ),

        // --- Refreshing ---
        (CallState::Refreshing { attempt, refreshes }, CallEvent::RefreshSucceeded(token)) => (
            CallState::Dispatched {
                attempt,
                refreshes: refreshes + 1,
                token: token.clone(),
            },
            CallAction::Dispatch { token, attempt },
        ),

        (CallState::Refreshing { .. } | CallState::Renewing, CallEvent::RefreshFailed) => (
            CallState::LoggedOut,
            CallAction::Fail(CallFailure::SessionExpired),
        ),

        // --- Renewing ---
        (CallState::Renewing, CallEvent::RefreshSucceeded(token)) => {
            (CallState::Success, CallAction::Renewed(token))
        }

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, CallAction::None),
    }
}
