//! Authenticated HikeHub API client
//!
//! Wraps outbound calls with bearer-token attachment, expiry detection,
//! single-flight refresh (through [`hikehub_session::SessionManager`]) and
//! at most one refresh-triggered retry per logical call.
//!
//! Each call is driven by the pure state machine in [`call`]; [`ApiClient`]
//! executes the I/O each action implies.

pub mod call;
pub mod classify;
pub mod client;
pub mod error;
pub mod metrics;
pub mod request;

pub use call::{CallAction, CallEvent, CallFailure, CallState, MAX_REFRESHES_PER_CALL};
pub use classify::{DEFAULT_REJECTION_STATUSES, ResponseClass, classify_status};
pub use client::{ApiClient, ClientConfig, build_http_client};
pub use error::{Error, Result};
pub use request::{ApiRequest, ApiResponse, normalize_path};
