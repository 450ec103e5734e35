//! # Sync State Repository
//!
//! Bookkeeping owned by the sync core rather than by any entity.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Bookkeeping                                 │
//! │                                                                         │
//! │  sync_cursors      kind → opaque `since` token, advanced after a kind   │
//! │                    has been fully reconciled                            │
//! │                                                                         │
//! │  sync_tombstones   (kind, server_id) → deleted_at. An upsert whose      │
//! │                    updatedAt is not newer is a stale retry              │
//! │                                                                         │
//! │  deferred_deltas   child records parked until their parent task exists │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tombstone and deferred-delta writes happen inside the reconciliation
//! transaction, so they are connection-level functions. Cursor writes and
//! reads go through [`SyncStateRepository`].

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use tasklane_core::ResourceKind;

use crate::error::DbResult;

// =============================================================================
// Types
// =============================================================================

/// A child record waiting for its parent task.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeferredDelta {
    pub id: String,
    pub kind: String,
    pub server_id: String,
    pub parent_server_id: String,
    /// The record as received, JSON encoded.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Tombstones
// =============================================================================

/// Deletion time recorded for `(kind, server_id)`, if any.
pub async fn tombstone(
    conn: &mut SqliteConnection,
    kind: ResourceKind,
    server_id: &str,
) -> DbResult<Option<DateTime<Utc>>> {
    let deleted_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT deleted_at FROM sync_tombstones WHERE kind = ?1 AND server_id = ?2",
    )
    .bind(kind.as_str())
    .bind(server_id)
    .fetch_optional(conn)
    .await?;
    Ok(deleted_at)
}

/// Records a server delete. A later delete of the same id moves the marker
/// forward, never back.
pub async fn record_tombstone(
    conn: &mut SqliteConnection,
    kind: ResourceKind,
    server_id: &str,
    deleted_at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO sync_tombstones (kind, server_id, deleted_at, recorded_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(kind, server_id) DO UPDATE SET \
            deleted_at = MAX(sync_tombstones.deleted_at, excluded.deleted_at), \
            recorded_at = excluded.recorded_at",
    )
    .bind(kind.as_str())
    .bind(server_id)
    .bind(deleted_at)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

/// Forgets a tombstone once a newer upsert has resurrected the record.
pub async fn clear_tombstone(
    conn: &mut SqliteConnection,
    kind: ResourceKind,
    server_id: &str,
) -> DbResult<()> {
    sqlx::query("DELETE FROM sync_tombstones WHERE kind = ?1 AND server_id = ?2")
        .bind(kind.as_str())
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(())
}

// =============================================================================
// Deferred deltas
// =============================================================================

/// Parks a child record. Re-deferring the same record replaces its payload
/// and counts one more attempt.
pub async fn defer(
    conn: &mut SqliteConnection,
    kind: ResourceKind,
    server_id: &str,
    parent_server_id: &str,
    payload: &str,
    reason: &str,
) -> DbResult<()> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO deferred_deltas \
            (id, kind, server_id, parent_server_id, payload, attempts, last_error, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7) \
         ON CONFLICT(kind, server_id) DO UPDATE SET \
            parent_server_id = excluded.parent_server_id, \
            payload = excluded.payload, \
            attempts = deferred_deltas.attempts + 1, \
            last_error = excluded.last_error, \
            updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(kind.as_str())
    .bind(server_id)
    .bind(parent_server_id)
    .bind(payload)
    .bind(reason)
    .bind(now)
    .execute(conn)
    .await?;
    debug!(kind = %kind, server_id, parent_server_id, "Deferred child record");
    Ok(())
}

/// Drops a parked record once it has been applied or superseded.
pub async fn clear_deferred(
    conn: &mut SqliteConnection,
    kind: ResourceKind,
    server_id: &str,
) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM deferred_deltas WHERE kind = ?1 AND server_id = ?2")
        .bind(kind.as_str())
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Counts a failed retry.
pub async fn bump_attempts(conn: &mut SqliteConnection, id: &str, error: &str) -> DbResult<()> {
    sqlx::query(
        "UPDATE deferred_deltas SET attempts = attempts + 1, last_error = ?2, updated_at = ?3 \
         WHERE id = ?1",
    )
    .bind(id)
    .bind(error)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

/// Removes a parked record by row id.
pub async fn discard(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM deferred_deltas WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for cursors, tombstones and deferred deltas.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    /// All stored cursors keyed by kind. Rows naming an unknown kind are skipped.
    pub async fn load_cursors(&self) -> DbResult<BTreeMap<ResourceKind, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT kind, cursor FROM sync_cursors")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(kind, cursor)| kind.parse().ok().map(|kind| (kind, cursor)))
            .collect())
    }

    pub async fn get_cursor(&self, kind: ResourceKind) -> DbResult<Option<String>> {
        let cursor = sqlx::query_scalar("SELECT cursor FROM sync_cursors WHERE kind = ?1")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(cursor)
    }

    /// Persists the cursor for one kind. Call only after that kind's delta
    /// has been committed.
    pub async fn save_cursor(&self, kind: ResourceKind, cursor: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO sync_cursors (kind, cursor, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(kind) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at",
        )
        .bind(kind.as_str())
        .bind(cursor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        debug!(kind = %kind, cursor, "Saved sync cursor");
        Ok(())
    }

    /// Forgets every cursor so the next pass pulls everything.
    pub async fn clear_cursors(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sync_cursors")
            .execute(&self.pool)
            .await?;
        info!(cleared = result.rows_affected(), "Cleared sync cursors");
        Ok(result.rows_affected())
    }

    pub async fn tombstone(
        &self,
        kind: ResourceKind,
        server_id: &str,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let mut conn = self.pool.acquire().await?;
        tombstone(&mut conn, kind, server_id).await
    }

    /// Drops tombstones recorded more than `retention_days` ago.
    pub async fn prune_tombstones(&self, retention_days: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let result = sqlx::query("DELETE FROM sync_tombstones WHERE recorded_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let pruned = result.rows_affected();
        if pruned > 0 {
            info!(pruned, retention_days, "Pruned old tombstones");
        }
        Ok(pruned)
    }

    /// Parked records of one kind, oldest first.
    pub async fn deferred(&self, kind: ResourceKind) -> DbResult<Vec<DeferredDelta>> {
        let rows = sqlx::query_as::<_, DeferredDelta>(
            "SELECT id, kind, server_id, parent_server_id, payload, attempts, last_error, \
                    created_at, updated_at \
             FROM deferred_deltas WHERE kind = ?1 ORDER BY created_at ASC, id ASC",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn deferred_count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM deferred_deltas")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
