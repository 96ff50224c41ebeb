//! Session manager: token slot, single-flight refresh, session end
//!
//! One `SessionManager` owns the access token for a process. Every read and
//! write of the token, and every refresh exchange, goes through it.
//!
//! Refresh coalescing: the first caller that needs a refresh installs a
//! shared future in `in_flight`; every caller arriving before it resolves
//! awaits that same future and observes the same token or the same error.
//! The future stores the new token (or ends the session) *before* clearing
//! the marker, so a caller that finds the marker empty always sees the
//! post-refresh slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::Secret;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::claims::{TokenStatus, classify_token, unix_now};
use crate::constants::DEFAULT_STORAGE_KEY;
use crate::error::{Error, Result};
use crate::events::{EndReason, Observers, SessionEnded};
use crate::storage::SessionStorage;
use crate::token::TokenRefresher;

type RefreshFlight = Shared<BoxFuture<'static, Result<Secret<String>>>>;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Storage slot for the access token
    pub storage_key: String,
    /// Treat tokens as expired this long before their `exp`
    pub expiry_leeway: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            expiry_leeway: Duration::ZERO,
        }
    }
}

/// Cheaply cloneable handle to the process-wide session state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn SessionStorage>,
    refresher: Arc<dyn TokenRefresher>,
    config: SessionConfig,
    in_flight: Mutex<Option<RefreshFlight>>,
    /// Set when a refresh was refused; cleared by the next `set_token`.
    revoked: AtomicBool,
    observers: Observers,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        refresher: Arc<dyn TokenRefresher>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                refresher,
                config,
                in_flight: Mutex::new(None),
                revoked: AtomicBool::new(false),
                observers: Observers::default(),
            }),
        }
    }

    /// Current access token, if any.
    pub async fn get_token(&self) -> Result<Option<Secret<String>>> {
        self.inner.read_token().await
    }

    /// Store a token obtained from login (or seeded from configuration).
    pub async fn set_token(&self, token: Secret<String>) -> Result<()> {
        self.inner.write_token(&token).await?;
        self.inner.revoked.store(false, Ordering::SeqCst);
        debug!("access token stored");
        Ok(())
    }

    /// Delete the stored token without notifying observers.
    pub async fn clear_token(&self) -> Result<()> {
        self.inner
            .storage
            .remove_item(&self.inner.config.storage_key)
            .await
    }

    /// Classify the stored token against the current time.
    pub async fn token_status(&self) -> Result<TokenStatus> {
        let leeway = self.inner.config.expiry_leeway.as_secs();
        Ok(match self.inner.read_token().await? {
            Some(token) => classify_token(token, unix_now(), leeway),
            None if self.inner.revoked.load(Ordering::SeqCst) => TokenStatus::Revoked,
            None => TokenStatus::Missing,
        })
    }

    /// Whether a token is stored. Expiry is not considered.
    pub async fn is_authenticated(&self) -> bool {
        matches!(self.inner.read_token().await, Ok(Some(_)))
    }

    /// Obtain a token newer than `stale`, performing at most one refresh
    /// exchange across all concurrent callers.
    ///
    /// - A refresh already in flight is joined, not duplicated.
    /// - If the slot already holds a different token, another caller has
    ///   refreshed since `stale` was read and that token is returned.
    /// - If the slot is empty the session ended meanwhile: `SessionEnded`.
    pub async fn refresh_once(&self, stale: &Secret<String>) -> Result<Secret<String>> {
        let flight = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(flight) => {
                    debug!("refresh already in flight, awaiting shared outcome");
                    flight.clone()
                }
                None => {
                    match self.inner.read_token().await? {
                        None => return Err(Error::SessionEnded),
                        Some(current) if current.expose() != stale.expose() => {
                            debug!("token already rotated by a concurrent refresh");
                            return Ok(current);
                        }
                        Some(_) => {}
                    }
                    let flight = Inner::start_refresh(&self.inner);
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Clear the token and notify observers.
    pub async fn end_session(&self, reason: EndReason) {
        self.inner.end_session(reason).await;
    }

    /// Register a handler called every time the session ends.
    pub fn on_session_ended<F>(&self, handler: F)
    where
        F: Fn(&SessionEnded) + Send + Sync + 'static,
    {
        self.inner.observers.register(Arc::new(handler));
    }
}

impl Inner {
    async fn read_token(&self) -> Result<Option<Secret<String>>> {
        Ok(self
            .storage
            .get_item(&self.config.storage_key)
            .await?
            .map(Secret::new))
    }

    async fn write_token(&self, token: &Secret<String>) -> Result<()> {
        self.storage
            .set_item(&self.config.storage_key, token.expose().clone())
            .await
    }

    async fn end_session(&self, reason: EndReason) {
        if let Err(e) = self.storage.remove_item(&self.config.storage_key).await {
            warn!(error = %e, "failed to clear access token");
        }
        if reason.revokes() {
            self.revoked.store(true, Ordering::SeqCst);
        } else if reason == EndReason::LoggedOut {
            self.revoked.store(false, Ordering::SeqCst);
        }

        metrics::counter!("hikehub_session_ended_total", "reason" => reason.label()).increment(1);
        info!(reason = reason.label(), "session ended");
        self.observers.notify(&SessionEnded { reason });
    }

    fn start_refresh(inner: &Arc<Inner>) -> RefreshFlight {
        let inner = Arc::clone(inner);
        async move {
            info!("refreshing access token");
            let result = match inner.refresher.refresh().await {
                Ok(token) => {
                    if let Err(e) = inner.write_token(&token).await {
                        warn!(error = %e, "failed to persist refreshed token");
                    }
                    metrics::counter!("hikehub_session_refresh_total", "outcome" => "success")
                        .increment(1);
                    info!("access token refreshed");
                    Ok(token)
                }
                Err(e) => {
                    warn!(error = %e, "token refresh failed, ending session");
                    metrics::counter!("hikehub_session_refresh_total", "outcome" => "failure")
                        .increment(1);
                    inner.end_session(EndReason::RefreshFailed).await;
                    Err(e)
                }
            };
            inner.in_flight.lock().await.take();
            result
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    /// Refresher that counts exchanges and answers after a delay, so that
    /// concurrent callers genuinely overlap.
    struct CountingRefresher {
        calls: AtomicUsize,
        outcome: Result<String>,
        delay: Duration,
    }

    impl CountingRefresher {
        fn issuing(token: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome: Ok(token.to_string()),
                delay: Duration::from_millis(50),
            })
        }

        fn refusing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome: Err(Error::RefreshRejected {
                    status: 401,
                    body: "refresh cookie expired".into(),
                }),
                delay: Duration::from_millis(50),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenRefresher for CountingRefresher {
        fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.outcome.clone().map(Secret::new)
            })
        }
    }

    fn jwt(exp: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"organizer","exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    fn manager(refresher: Arc<CountingRefresher>) -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryStorage::new()),
            refresher,
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn set_get_clear_roundtrip() {
        let session = manager(CountingRefresher::issuing("unused"));
        assert!(session.get_token().await.unwrap().is_none());

        session
            .set_token(Secret::new("at_1".to_string()))
            .await
            .unwrap();
        assert_eq!(session.get_token().await.unwrap().unwrap().expose(), "at_1");
        assert!(session.is_authenticated().await);

        session.clear_token().await.unwrap();
        assert!(session.get_token().await.unwrap().is_none());
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn token_status_reflects_expiry() {
        let session = manager(CountingRefresher::issuing("unused"));
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Missing
        ));

        session
            .set_token(Secret::new(jwt(unix_now() + 3600)))
            .await
            .unwrap();
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Valid(_)
        ));

        session
            .set_token(Secret::new(jwt(unix_now() - 1)))
            .await
            .unwrap();
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Expired(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_exchange() {
        let refresher = CountingRefresher::issuing("at_new");
        let session = manager(refresher.clone());
        let stale = Secret::new(jwt(unix_now() - 1));
        session.set_token(stale.clone()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let session = session.clone();
            let stale = stale.clone();
            handles.push(tokio::spawn(async move {
                session.refresh_once(&stale).await
            }));
        }

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.expose(), "at_new");
        }
        assert_eq!(refresher.calls(), 1, "exactly one refresh exchange");
        assert_eq!(
            session.get_token().await.unwrap().unwrap().expose(),
            "at_new"
        );
    }

    #[tokio::test]
    async fn late_caller_with_stale_token_reuses_rotated_token() {
        let refresher = CountingRefresher::issuing("at_new");
        let session = manager(refresher.clone());
        let stale = Secret::new("at_old".to_string());
        session.set_token(stale.clone()).await.unwrap();

        session.refresh_once(&stale).await.unwrap();
        // A call that read the old token before the refresh finished
        let token = session.refresh_once(&stale).await.unwrap();

        assert_eq!(token.expose(), "at_new");
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn sequential_expiries_refresh_again() {
        let refresher = CountingRefresher::issuing("at_new");
        let session = manager(refresher.clone());

        let first = Secret::new("at_first".to_string());
        session.set_token(first.clone()).await.unwrap();
        session.refresh_once(&first).await.unwrap();

        // The refreshed token itself becomes stale later on
        let second = session.get_token().await.unwrap().unwrap();
        session.refresh_once(&second).await.unwrap();

        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test]
    async fn refused_refresh_fails_all_waiters_and_ends_session_once() {
        let refresher = CountingRefresher::refusing();
        let session = manager(refresher.clone());
        let ended = Arc::new(AtomicUsize::new(0));
        let counter = ended.clone();
        session.on_session_ended(move |event| {
            assert_eq!(event.reason, EndReason::RefreshFailed);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let stale = Secret::new(jwt(unix_now() - 1));
        session.set_token(stale.clone()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let session = session.clone();
            let stale = stale.clone();
            handles.push(tokio::spawn(async move {
                session.refresh_once(&stale).await
            }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::RefreshRejected { status: 401, .. }));
        }

        assert_eq!(refresher.calls(), 1);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(session.get_token().await.unwrap().is_none());
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Revoked
        ));
    }

    #[tokio::test]
    async fn refresh_after_session_ended_does_not_hit_backend() {
        let refresher = CountingRefresher::issuing("at_new");
        let session = manager(refresher.clone());
        let stale = Secret::new("at_old".to_string());
        session.set_token(stale.clone()).await.unwrap();
        session.end_session(EndReason::LoggedOut).await;

        let err = session.refresh_once(&stale).await.unwrap_err();
        assert!(matches!(err, Error::SessionEnded));
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn login_after_revocation_clears_revoked_flag() {
        let refresher = CountingRefresher::refusing();
        let session = manager(refresher);
        let stale = Secret::new("at_old".to_string());
        session.set_token(stale.clone()).await.unwrap();
        let _ = session.refresh_once(&stale).await;
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Revoked
        ));

        session
            .set_token(Secret::new(jwt(unix_now() + 600)))
            .await
            .unwrap();
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Valid(_)
        ));
    }

    #[tokio::test]
    async fn logout_reports_missing_not_revoked() {
        let session = manager(CountingRefresher::issuing("unused"));
        session
            .set_token(Secret::new("at_1".to_string()))
            .await
            .unwrap();
        session.end_session(EndReason::LoggedOut).await;
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Missing
        ));
    }

    #[tokio::test]
    async fn no_credential_keeps_revoked_state() {
        let session = manager(CountingRefresher::refusing());
        let stale = Secret::new("at_old".to_string());
        session.set_token(stale.clone()).await.unwrap();
        let _ = session.refresh_once(&stale).await;

        session.end_session(EndReason::NoCredential).await;
        assert!(matches!(
            session.token_status().await.unwrap(),
            TokenStatus::Revoked
        ));
    }

    #[tokio::test]
    async fn custom_storage_key_is_used() {
        let storage = Arc::new(MemoryStorage::new());
        let session = SessionManager::new(
            storage.clone(),
            CountingRefresher::issuing("unused"),
            SessionConfig {
                storage_key: "hikehub.organizer.token".into(),
                expiry_leeway: Duration::ZERO,
            },
        );
        session
            .set_token(Secret::new("at_keyed".to_string()))
            .await
            .unwrap();

        assert_eq!(
            storage
                .get_item("hikehub.organizer.token")
                .await
                .unwrap()
                .as_deref(),
            Some("at_keyed")
        );
        assert_eq!(storage.get_item(DEFAULT_STORAGE_KEY).await.unwrap(), None);
    }
}
