//! # Token Store
//!
//! Durable home of the session's access/refresh token pair. No logic beyond
//! storage: expiry decisions belong to [`AccessTokenManager`].
//!
//! [`AccessTokenManager`]: crate::auth::AccessTokenManager

use async_trait::async_trait;
use tasklane_core::TokenPair;
use tasklane_db::{AuthTokenRepository, Database};
use tokio::sync::Mutex;

use crate::error::AuthError;

/// Persists and retrieves the token pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<TokenPair>, AuthError>;

    async fn save(&self, tokens: &TokenPair) -> Result<(), AuthError>;

    async fn clear(&self) -> Result<(), AuthError>;
}

// =============================================================================
// SQLite
// =============================================================================

/// Token store backed by the local database's `auth_tokens` row.
#[derive(Debug, Clone)]
pub struct SqliteTokenStore {
    repo: AuthTokenRepository,
}

impl SqliteTokenStore {
    pub fn new(db: &Database) -> Self {
        SqliteTokenStore {
            repo: db.auth_tokens(),
        }
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn load(&self) -> Result<Option<TokenPair>, AuthError> {
        self.repo
            .load()
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    async fn save(&self, tokens: &TokenPair) -> Result<(), AuthError> {
        self.repo
            .save(tokens)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    async fn clear(&self) -> Result<(), AuthError> {
        self.repo
            .clear()
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Ephemeral token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        MemoryTokenStore {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenPair>, AuthError> {
        Ok(self.tokens.lock().await.clone())
    }

    async fn save(&self, tokens: &TokenPair) -> Result<(), AuthError> {
        *self.tokens.lock().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        *self.tokens.lock().await = None;
        Ok(())
    }
}
