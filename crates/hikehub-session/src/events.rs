//! Session-ended notification
//!
//! Whoever needs to react to a lost session (reset UI state, redirect to the
//! login screen, flip a health flag) registers a handler instead of the
//! client reaching into any particular state container.

use std::sync::{Arc, Mutex, PoisonError};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A call was attempted with no stored access token
    NoCredential,
    /// The refresh exchange was refused or failed
    RefreshFailed,
    /// The backend rejected a freshly refreshed token
    RejectedAfterRefresh,
    /// Explicit logout
    LoggedOut,
}

impl EndReason {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::NoCredential => "no_credential",
            EndReason::RefreshFailed => "refresh_failed",
            EndReason::RejectedAfterRefresh => "rejected_after_refresh",
            EndReason::LoggedOut => "logged_out",
        }
    }

    /// Whether later calls should report an expired session rather than a
    /// missing one.
    pub fn revokes(&self) -> bool {
        matches!(
            self,
            EndReason::RefreshFailed | EndReason::RejectedAfterRefresh
        )
    }
}

/// Event delivered to session-ended handlers after the token is cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub reason: EndReason,
}

type Handler = Arc<dyn Fn(&SessionEnded) + Send + Sync>;

/// Registered session-ended handlers.
#[derive(Default)]
pub(crate) struct Observers {
    handlers: Mutex<Vec<Handler>>,
}

impl Observers {
    pub(crate) fn register(&self, handler: Handler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Call every handler. The list is snapshotted first so a handler may
    /// register another without deadlocking.
    pub(crate) fn notify(&self, event: &SessionEnded) {
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(event);
        }
    }
}
