//! # Access Token Manager
//!
//! Guarantees a non-expired access token before every authenticated call and
//! exchanges the refresh token when needed.
//!
//! ## Refresh Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Single-Flight Refresh                             │
//! │                                                                         │
//! │  caller A ─┐                                                            │
//! │  caller B ─┼─► get_valid_access_token()                                 │
//! │  caller C ─┘        │                                                   │
//! │                     ▼                                                   │
//! │            cached & outside margin? ──yes──► return cached token        │
//! │                     │ no                                                │
//! │                     ▼                                                   │
//! │            refresh in flight? ──yes──► await the same Shared future     │
//! │                     │ no                                                │
//! │                     ▼                                                   │
//! │            start one refresh (POST auth/refresh)                        │
//! │                     │                                                   │
//! │        ┌────────────┼───────────────────┐                               │
//! │        ▼            ▼                   ▼                               │
//! │     new pair    SessionExpired      transient error                     │
//! │     (saved)     (store cleared)     (pair kept, caller may retry)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! After a 401, the HTTP client calls [`AccessTokenManager::force_refresh`]
//! with the rejected token. When another caller has already replaced it, the
//! new token is returned without a second exchange.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::{DecodingKey, Validation};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tasklane_core::TokenPair;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::{AuthError, SyncResult};
use crate::http::endpoint_url;
use crate::token_store::TokenStore;

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenPair, AuthError>>>;

// =============================================================================
// Refresher
// =============================================================================

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Refresher calling `POST {base}/auth/refresh`.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    endpoint: Url,
    default_lifetime: Duration,
}

impl HttpTokenRefresher {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.api.request_timeout())
            .connect_timeout(config.api.connect_timeout())
            .build()
            .map_err(|e| crate::error::SyncError::Internal(e.to_string()))?;
        let base = Url::parse(&config.api.base_url)?;
        Ok(HttpTokenRefresher {
            http,
            endpoint: endpoint_url(&base, &["auth", "refresh"])?,
            default_lifetime: Duration::seconds(config.auth.default_token_lifetime_secs as i64),
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            warn!(status = status.as_u16(), "Refresh token rejected");
            return Err(AuthError::SessionExpired);
        }
        if !status.is_success() {
            return Err(AuthError::Server {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(map_transport_error)?;
        let parsed: RefreshResponse = serde_json::from_slice(&body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let now = Utc::now();
        let expires_at = parsed
            .expires_in
            .map(|secs| now + Duration::seconds(secs))
            .or_else(|| jwt_expiry(&parsed.access_token))
            .unwrap_or(now + self.default_lifetime);

        Ok(TokenPair {
            access_token: parsed.access_token,
            refresh_token: parsed
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_at,
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout
    } else if err.is_decode() || err.is_body() {
        AuthError::InvalidResponse(err.to_string())
    } else {
        AuthError::Offline(err.to_string())
    }
}

/// Reads the `exp` claim of a JWT without verifying its signature. The
/// service verifies tokens; the client only needs to know when to refresh.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: i64,
    }

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data =
        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(data.claims.exp, 0)
}

// =============================================================================
// Manager
// =============================================================================

#[derive(Default)]
struct TokenState {
    current: Option<TokenPair>,
    loaded: bool,
    /// Bumped whenever the session is replaced; a refresh started under an
    /// older generation does not overwrite the newer session.
    generation: u64,
    inflight: Option<RefreshFuture>,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    margin: Duration,
    state: Mutex<TokenState>,
}

/// Token lifecycle owner. Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct AccessTokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AccessTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenManager")
            .field("margin", &self.inner.margin)
            .finish_non_exhaustive()
    }
}

impl AccessTokenManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        margin: Duration,
    ) -> Self {
        AccessTokenManager {
            inner: Arc::new(Inner {
                store,
                refresher,
                margin,
                state: Mutex::new(TokenState::default()),
            }),
        }
    }

    /// Returns an access token that does not expire within the margin,
    /// refreshing it first if needed.
    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        let refresh = {
            let mut state = self.inner.state.lock().await;
            self.ensure_loaded(&mut state).await?;
            let refresh_token = match state.current.as_ref() {
                None => return Err(AuthError::SessionExpired),
                Some(pair) if !pair.expires_within(self.inner.margin, Utc::now()) => {
                    return Ok(pair.access_token.clone());
                }
                Some(pair) => pair.refresh_token.clone(),
            };
            self.start_or_join(&mut state, refresh_token)
        };
        refresh.await.map(|pair| pair.access_token)
    }

    /// Replaces a token the service rejected with 401.
    pub async fn force_refresh(&self, rejected: &str) -> Result<String, AuthError> {
        let refresh = {
            let mut state = self.inner.state.lock().await;
            self.ensure_loaded(&mut state).await?;
            let refresh_token = match state.current.as_ref() {
                None => return Err(AuthError::SessionExpired),
                Some(pair)
                    if pair.access_token != rejected
                        && !pair.expires_within(self.inner.margin, Utc::now()) =>
                {
                    debug!("Token already replaced by a concurrent refresh");
                    return Ok(pair.access_token.clone());
                }
                Some(pair) => pair.refresh_token.clone(),
            };
            self.start_or_join(&mut state, refresh_token)
        };
        refresh.await.map(|pair| pair.access_token)
    }

    /// Installs a new session, e.g. after sign-in.
    pub async fn set_session(&self, tokens: TokenPair) -> Result<(), AuthError> {
        self.inner.store.save(&tokens).await?;
        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        state.inflight = None;
        state.current = Some(tokens);
        state.loaded = true;
        info!("Session installed");
        Ok(())
    }

    /// Drops the session locally.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.store.clear().await?;
        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        state.inflight = None;
        state.current = None;
        state.loaded = true;
        Ok(())
    }

    /// True when a token pair is held or stored.
    pub async fn has_session(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        self.ensure_loaded(&mut state).await.is_ok() && state.current.is_some()
    }

    async fn ensure_loaded(&self, state: &mut TokenState) -> Result<(), AuthError> {
        if !state.loaded {
            state.current = self.inner.store.load().await?;
            state.loaded = true;
            debug!(present = state.current.is_some(), "Loaded stored token pair");
        }
        Ok(())
    }

    /// Joins the refresh in flight or starts one. The returned future updates
    /// the shared state itself, so it completes correctly whichever waiter
    /// polls it.
    fn start_or_join(&self, state: &mut TokenState, refresh_token: String) -> RefreshFuture {
        if let Some(inflight) = &state.inflight {
            debug!("Joining in-flight token refresh");
            return inflight.clone();
        }

        let inner = Arc::clone(&self.inner);
        let generation = state.generation;
        let refresh = async move {
            info!("Refreshing access token");
            let result = inner.refresher.refresh(&refresh_token).await;

            let mut state = inner.state.lock().await;
            if state.generation != generation {
                debug!("Session replaced during refresh, discarding result");
                return result;
            }
            state.inflight = None;

            match &result {
                Ok(pair) => {
                    if let Err(e) = inner.store.save(pair).await {
                        warn!(error = %e, "Failed to persist refreshed token pair");
                    }
                    state.current = Some(pair.clone());
                    debug!(expires_at = %pair.expires_at, "Access token refreshed");
                }
                Err(AuthError::SessionExpired) => {
                    warn!("Refresh token rejected, session expired");
                    state.current = None;
                    state.generation += 1;
                    if let Err(e) = inner.store.clear().await {
                        warn!(error = %e, "Failed to clear expired token pair");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Token refresh failed, keeping current pair");
                }
            }
            result
        }
        .boxed()
        .shared();

        state.inflight = Some(refresh.clone());
        refresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::MemoryTokenStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
        outcome: Result<(), AuthError>,
    }

    impl CountingRefresher {
        fn ok() -> Arc<Self> {
            Arc::new(CountingRefresher {
                calls: AtomicUsize::new(0),
                outcome: Ok(()),
            })
        }

        fn failing(err: AuthError) -> Arc<Self> {
            Arc::new(CountingRefresher {
                calls: AtomicUsize::new(0),
                outcome: Err(err),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.outcome.clone()?;
            Ok(TokenPair {
                access_token: format!("fresh-{n}"),
                refresh_token: refresh_token.to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }
    }

    fn pair(access: &str, expires_in: Duration) -> TokenPair {
        TokenPair {
            access_token: access.into(),
            refresh_token: "r1".into(),
            expires_at: Utc::now() + expires_in,
        }
    }

    fn manager(
        store: Arc<MemoryTokenStore>,
        refresher: Arc<CountingRefresher>,
    ) -> AccessTokenManager {
        AccessTokenManager::new(store, refresher, Duration::seconds(60))
    }

    #[tokio::test]
    async fn test_valid_token_is_returned_without_refresh() {
        let refresher = CountingRefresher::ok();
        let store = Arc::new(MemoryTokenStore::with_tokens(pair("a1", Duration::hours(1))));
        let tokens = manager(store, refresher.clone());

        assert_eq!(tokens.get_valid_access_token().await.unwrap(), "a1");
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let refresher = CountingRefresher::ok();
        let store = Arc::new(MemoryTokenStore::with_tokens(pair("old", -Duration::minutes(5))));
        let tokens = manager(store.clone(), refresher.clone());

        let results = futures_util::future::join_all(
            (0..5).map(|_| {
                let tokens = tokens.clone();
                async move { tokens.get_valid_access_token().await }
            }),
        )
        .await;

        assert_eq!(refresher.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), "fresh-1");
        }
        assert_eq!(
            store.load().await.unwrap().unwrap().access_token,
            "fresh-1"
        );

        // Cached afterwards.
        tokens.get_valid_access_token().await.unwrap();
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let refresher = CountingRefresher::ok();
        let store = Arc::new(MemoryTokenStore::with_tokens(pair("a1", Duration::seconds(30))));
        let tokens = manager(store, refresher.clone());

        assert_eq!(tokens.get_valid_access_token().await.unwrap(), "fresh-1");
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_token_expires_session() {
        let refresher = CountingRefresher::failing(AuthError::SessionExpired);
        let store = Arc::new(MemoryTokenStore::with_tokens(pair("old", -Duration::minutes(1))));
        let tokens = manager(store.clone(), refresher);

        assert_eq!(
            tokens.get_valid_access_token().await,
            Err(AuthError::SessionExpired)
        );
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(
            tokens.get_valid_access_token().await,
            Err(AuthError::SessionExpired)
        );
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_pair() {
        let refresher = CountingRefresher::failing(AuthError::Timeout);
        let store = Arc::new(MemoryTokenStore::with_tokens(pair("old", -Duration::minutes(1))));
        let tokens = manager(store.clone(), refresher.clone());

        let err = tokens.get_valid_access_token().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.load().await.unwrap().is_some());

        // The next caller tries again rather than reusing the failed attempt.
        let _ = tokens.get_valid_access_token().await;
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_session() {
        let tokens = manager(Arc::new(MemoryTokenStore::new()), CountingRefresher::ok());
        assert!(!tokens.has_session().await);
        assert_eq!(
            tokens.get_valid_access_token().await,
            Err(AuthError::SessionExpired)
        );
    }

    #[tokio::test]
    async fn test_force_refresh_skips_when_already_replaced() {
        let refresher = CountingRefresher::ok();
        let store = Arc::new(MemoryTokenStore::with_tokens(pair("current", Duration::hours(1))));
        let tokens = manager(store, refresher.clone());

        assert_eq!(tokens.force_refresh("stale").await.unwrap(), "current");
        assert_eq!(refresher.calls(), 0);

        assert_eq!(tokens.force_refresh("current").await.unwrap(), "fresh-1");
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_set_session_replaces_pair() {
        let store = Arc::new(MemoryTokenStore::new());
        let tokens = manager(store.clone(), CountingRefresher::ok());
        tokens
            .set_session(pair("signed-in", Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(tokens.get_valid_access_token().await.unwrap(), "signed-in");
        assert!(store.load().await.unwrap().is_some());

        tokens.sign_out().await.unwrap();
        assert!(!tokens.has_session().await);
    }

    // -------------------------------------------------------------------------
    // HTTP refresher
    // -------------------------------------------------------------------------

    fn refresher_for(server: &mockito::Server) -> HttpTokenRefresher {
        let mut config = SyncConfig::default();
        config.api.base_url = server.url();
        HttpTokenRefresher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_http_refresh_uses_expires_in() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({"refreshToken": "r1"}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"a2","refreshToken":"r2","expiresIn":120}"#)
            .create_async()
            .await;

        let before = Utc::now();
        let pair = refresher_for(&server).refresh("r1").await.unwrap();
        mock.assert_async().await;

        assert_eq!(pair.access_token, "a2");
        assert_eq!(pair.refresh_token, "r2");
        assert!(pair.expires_at >= before + Duration::seconds(119));
        assert!(pair.expires_at <= Utc::now() + Duration::seconds(121));
    }

    #[tokio::test]
    async fn test_http_refresh_falls_back_to_jwt_exp() {
        #[derive(Serialize)]
        struct Claims {
            sub: String,
            exp: i64,
        }
        let exp = Utc::now().timestamp() + 900;
        let jwt = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &Claims {
                sub: "user-1".into(),
                exp,
            },
            &jsonwebtoken::EncodingKey::from_secret(b"server-secret"),
        )
        .unwrap();

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(serde_json::json!({ "accessToken": jwt }).to_string())
            .create_async()
            .await;

        let pair = refresher_for(&server).refresh("r1").await.unwrap();
        assert_eq!(pair.refresh_token, "r1");
        assert_eq!(pair.expires_at.timestamp(), exp);
    }

    #[tokio::test]
    async fn test_http_refresh_status_mapping() {
        let mut rejecting = mockito::Server::new_async().await;
        rejecting
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .create_async()
            .await;
        assert_eq!(
            refresher_for(&rejecting).refresh("r1").await,
            Err(AuthError::SessionExpired)
        );

        let mut failing = mockito::Server::new_async().await;
        failing
            .mock("POST", "/auth/refresh")
            .with_status(503)
            .create_async()
            .await;
        let err = refresher_for(&failing).refresh("r1").await.unwrap_err();
        assert_eq!(err, AuthError::Server { status: 503 });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_jwt_expiry_of_garbage_is_none() {
        assert!(jwt_expiry("not-a-jwt").is_none());
    }
}
