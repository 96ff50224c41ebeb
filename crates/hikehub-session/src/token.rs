//! Login and refresh exchanges
//!
//! Both endpoints answer `{"token": "<jwt>"}`. Login also sets the HTTP-only
//! refresh cookie; refresh consumes it. The cookie only ever lives in the
//! shared `reqwest::Client` cookie jar, so the same client must be used for
//! login, refresh and regular calls.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Body returned by the login and refresh endpoints.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Exchange organizer credentials for an access token.
///
/// The credential body is forwarded untouched; its schema belongs to the
/// backend. Any non-2xx answer is a `LoginRejected` carrying status and body.
pub async fn login<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    credentials: &T,
) -> Result<TokenResponse> {
    let response = client
        .post(url)
        .json(credentials)
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::LoginRejected {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid login response: {e}")))
}

/// Ask the backend for a new access token using the refresh cookie.
pub async fn refresh_token(client: &reqwest::Client, url: &str) -> Result<TokenResponse> {
    let response = client
        .post(url)
        .json(&serde_json::json!({}))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403 means the refresh cookie is missing, expired or revoked
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::RefreshRejected {
                status: status.as_u16(),
                body,
            });
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Source of fresh access tokens for the session manager.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility (`Arc<dyn TokenRefresher>`).
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>>;
}

/// Refresher that calls the backend refresh endpoint.
pub struct HttpRefresher {
    client: reqwest::Client,
    url: String,
}

impl HttpRefresher {
    /// `client` must be the cookie-holding client that performed the login.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl TokenRefresher for HttpRefresher {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            let response = refresh_token(&self.client, &self.url).await?;
            Ok(Secret::new(response.token))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use tokio::net::TcpListener;

    /// Backend that issues a refresh cookie on login and only honors refresh
    /// calls that present it.
    async fn start_auth_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new()
            .route(
                "/auth/login",
                post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                    if body["password"] == "correct" {
                        (
                            StatusCode::OK,
                            [("set-cookie", "refreshToken=rt_cookie; Path=/; HttpOnly")],
                            axum::Json(serde_json::json!({"token": "at_login"})),
                        )
                            .into_response()
                    } else {
                        (StatusCode::UNAUTHORIZED, "bad credentials").into_response()
                    }
                }),
            )
            .route(
                "/auth/refresh",
                post(|headers: HeaderMap| async move {
                    let has_cookie = headers
                        .get("cookie")
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.contains("refreshToken=rt_cookie"));
                    if has_cookie {
                        axum::Json(serde_json::json!({"token": "at_refreshed"})).into_response()
                    } else {
                        (StatusCode::UNAUTHORIZED, "no refresh cookie").into_response()
                    }
                }),
            )
            .route(
                "/broken/refresh",
                post(|| async { (StatusCode::OK, "not json") }),
            )
            .route(
                "/down/refresh",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }

    fn cookie_client() -> reqwest::Client {
        reqwest::Client::builder().cookie_store(true).build().unwrap()
    }

    #[test]
    fn token_response_deserializes() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"token":"at_abc"}"#).unwrap();
        assert_eq!(parsed.token, "at_abc");
    }

    #[test]
    fn token_response_debug_is_redacted() {
        let parsed = TokenResponse {
            token: "at_visible".into(),
        };
        let debug = format!("{parsed:?}");
        assert!(!debug.contains("at_visible"), "got: {debug}");
    }

    #[tokio::test]
    async fn login_then_refresh_uses_cookie_jar() {
        let base = start_auth_server().await;
        let client = cookie_client();

        let login_response = login(
            &client,
            &format!("{base}/auth/login"),
            &serde_json::json!({"email": "org@hikehub.test", "password": "correct"}),
        )
        .await
        .unwrap();
        assert_eq!(login_response.token, "at_login");

        let refreshed = refresh_token(&client, &format!("{base}/auth/refresh"))
            .await
            .unwrap();
        assert_eq!(refreshed.token, "at_refreshed");
    }

    #[tokio::test]
    async fn login_rejection_carries_status_and_body() {
        let base = start_auth_server().await;
        let client = cookie_client();

        let err = login(
            &client,
            &format!("{base}/auth/login"),
            &serde_json::json!({"email": "org@hikehub.test", "password": "wrong"}),
        )
        .await
        .unwrap_err();

        match err {
            Error::LoginRejected { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad credentials");
            }
            other => panic!("expected LoginRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_without_cookie_is_rejected() {
        let base = start_auth_server().await;
        let err = refresh_token(&cookie_client(), &format!("{base}/auth/refresh"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::RefreshRejected { status: 401, .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn refresh_server_error_is_token_exchange() {
        let base = start_auth_server().await;
        let err = refresh_token(&cookie_client(), &format!("{base}/down/refresh"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn refresh_invalid_body_is_token_exchange() {
        let base = start_auth_server().await;
        let err = refresh_token(&cookie_client(), &format!("{base}/broken/refresh"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn refresh_unreachable_backend_is_http_error() {
        let err = refresh_token(&cookie_client(), "http://127.0.0.1:1/auth/refresh")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn http_refresher_wraps_token_in_secret() {
        let base = start_auth_server().await;
        let client = cookie_client();
        login(
            &client,
            &format!("{base}/auth/login"),
            &serde_json::json!({"password": "correct"}),
        )
        .await
        .unwrap();

        let refresher = HttpRefresher::new(client, format!("{base}/auth/refresh"));
        let token = refresher.refresh().await.unwrap();
        assert_eq!(token.expose(), "at_refreshed");
        assert_eq!(format!("{token:?}"), "[REDACTED]");
    }
}
