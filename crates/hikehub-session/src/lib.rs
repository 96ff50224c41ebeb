//! HikeHub session and token lifecycle
//!
//! Owns the access token for one organizer session: where it is stored, how
//! its `exp` claim is read, how it is renewed through the refresh endpoint,
//! and who is told when the session ends. The HTTP client crate drives this
//! through [`SessionManager`]; nothing else writes the token.
//!
//! Token flow:
//! 1. `token::login()` exchanges credentials, the server sets the refresh cookie
//! 2. `SessionManager::set_token()` stores the returned access token
//! 3. Before each call the client reads `SessionManager::token_status()`
//! 4. Expired or rejected tokens go through `SessionManager::refresh_once()`,
//!    which coalesces concurrent callers onto one refresh exchange
//! 5. A failed refresh clears the token and fires `on_session_ended` observers

pub mod claims;
pub mod constants;
pub mod error;
pub mod events;
pub mod manager;
pub mod storage;
pub mod token;

pub use claims::{TokenStatus, classify_token, decode_expiry, unix_now};
pub use constants::*;
pub use error::{Error, Result};
pub use events::{EndReason, SessionEnded};
pub use manager::{SessionConfig, SessionManager};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use token::{HttpRefresher, TokenRefresher, TokenResponse, login, refresh_token};
