//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tasklane_core::TokenPair;
use tasklane_db::{Database, DbConfig};

use crate::auth::{AccessTokenManager, TokenRefresher};
use crate::config::SyncConfig;
use crate::error::AuthError;
use crate::http::ApiClient;
use crate::token_store::MemoryTokenStore;

/// Refresher that hands out `fresh-1`, `fresh-2`, ... and counts calls.
#[derive(Debug, Default)]
pub struct CountingRefresher {
    calls: AtomicUsize,
    delay: Option<std::time::Duration>,
}

impl CountingRefresher {
    /// Each refresh sleeps for `delay` before answering.
    pub fn with_delay(delay: std::time::Duration) -> Self {
        CountingRefresher {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(TokenPair {
            access_token: format!("fresh-{n}"),
            refresh_token: refresh_token.to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}

/// Refresher whose refresh token is always rejected.
#[derive(Debug, Default)]
pub struct RejectingRefresher;

#[async_trait]
impl TokenRefresher for RejectingRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, AuthError> {
        Err(AuthError::SessionExpired)
    }
}

pub fn valid_pair(access: &str) -> TokenPair {
    TokenPair {
        access_token: access.into(),
        refresh_token: "refresh-1".into(),
        expires_at: Utc::now() + Duration::hours(1),
    }
}

pub fn expired_pair(access: &str) -> TokenPair {
    TokenPair {
        expires_at: Utc::now() - Duration::minutes(5),
        ..valid_pair(access)
    }
}

pub async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory())
        .await
        .expect("in-memory database")
}

pub fn config_for(url: &str) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.api.base_url = url.to_string();
    config
}

/// Token manager holding `pair`, refreshed by `refresher`.
pub fn token_manager(pair: TokenPair, refresher: Arc<dyn TokenRefresher>) -> AccessTokenManager {
    AccessTokenManager::new(
        Arc::new(MemoryTokenStore::with_tokens(pair)),
        refresher,
        Duration::seconds(60),
    )
}

/// Client for a mock server, holding a valid token `access`.
pub fn api_client(url: &str, access: &str) -> (ApiClient, Arc<CountingRefresher>) {
    let refresher = Arc::new(CountingRefresher::default());
    let tokens = token_manager(valid_pair(access), refresher.clone());
    let client = ApiClient::new(&config_for(url).api, tokens).expect("api client");
    (client, refresher)
}
