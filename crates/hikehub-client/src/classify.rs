//! Response status classification

/// Statuses the HikeHub backend uses to reject an access token.
///
/// The backend answers an expired token with 403; 401 is accepted too.
pub const DEFAULT_REJECTION_STATUSES: &[u16] = &[401, 403];

/// How a dispatched response drives the call state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx
    Success,
    /// The backend refused the bearer token
    CredentialRejected,
    /// Any other non-2xx status
    Failed,
}

pub fn classify_status(status: u16, rejection_statuses: &[u16]) -> ResponseClass {
    if (200..300).contains(&status) {
        ResponseClass::Success
    } else if rejection_statuses.contains(&status) {
        ResponseClass::CredentialRejected
    } else {
        ResponseClass::Failed
    }
}
