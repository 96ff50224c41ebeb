//! HikeHub backend defaults
//!
//! Paths are relative to the API base URL and are joined by the client.

/// Production API base URL used by the organizer application.
pub const DEFAULT_BASE_URL: &str = "https://hikeapi.issipeteta.net/api/v1.0/";

/// Storage slot holding the access token.
pub const DEFAULT_STORAGE_KEY: &str = "accessToken";

/// Refresh exchange endpoint. Authenticated by the refresh cookie, never by
/// the (possibly expired) access token.
pub const REFRESH_PATH: &str = "auth/refresh";

/// Credential exchange endpoint. Sets the refresh cookie on success.
pub const LOGIN_PATH: &str = "auth/login";
