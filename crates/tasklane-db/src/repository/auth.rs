//! # Auth Token Repository
//!
//! Persists the single token pair of the signed-in session.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use tasklane_core::TokenPair;

use crate::error::DbResult;

#[derive(Debug, Clone)]
pub struct AuthTokenRepository {
    pool: SqlitePool,
}

impl AuthTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AuthTokenRepository { pool }
    }

    pub async fn load(&self) -> DbResult<Option<TokenPair>> {
        let row: Option<(String, String, chrono::DateTime<Utc>)> = sqlx::query_as(
            "SELECT access_token, refresh_token, expires_at FROM auth_tokens WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(access_token, refresh_token, expires_at)| TokenPair {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Replaces the stored pair.
    pub async fn save(&self, tokens: &TokenPair) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO auth_tokens (id, access_token, refresh_token, expires_at, updated_at) \
             VALUES (1, ?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET \
                access_token = excluded.access_token, \
                refresh_token = excluded.refresh_token, \
                expires_at = excluded.expires_at, \
                updated_at = excluded.updated_at",
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(tokens.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        debug!(expires_at = %tokens.expires_at, "Stored token pair");
        Ok(())
    }

    pub async fn clear(&self) -> DbResult<()> {
        sqlx::query("DELETE FROM auth_tokens")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
