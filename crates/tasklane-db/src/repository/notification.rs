//! # Notification Request Repository
//!
//! Reminders are pulled from the service only; the UI reads them here to
//! schedule local notifications.

use sqlx::{SqliteConnection, SqlitePool};

use tasklane_core::NotificationRequest;

use super::SyncMeta;
use crate::error::DbResult;

const NOTIFICATION_COLUMNS: &str =
    "id, server_id, task_id, kind, fire_date, correlation_id, updated_at";

pub async fn find_sync_meta(
    conn: &mut SqliteConnection,
    server_id: &str,
) -> DbResult<Option<SyncMeta>> {
    let meta = sqlx::query_as::<_, SyncMeta>(
        "SELECT id, server_updated_at FROM notification_requests WHERE server_id = ?1",
    )
    .bind(server_id)
    .fetch_optional(conn)
    .await?;
    Ok(meta)
}

pub async fn find_unsynced_by_correlation(
    conn: &mut SqliteConnection,
    correlation_id: &str,
) -> DbResult<Option<String>> {
    let id = sqlx::query_scalar::<_, String>(
        "SELECT id FROM notification_requests WHERE correlation_id = ?1 AND server_id IS NULL",
    )
    .bind(correlation_id)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

pub async fn upsert_synced(
    conn: &mut SqliteConnection,
    notification: &NotificationRequest,
) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO notification_requests ({NOTIFICATION_COLUMNS}, server_updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(id) DO UPDATE SET \
            server_id = excluded.server_id, \
            task_id = excluded.task_id, \
            kind = excluded.kind, \
            fire_date = excluded.fire_date, \
            updated_at = excluded.updated_at, \
            server_updated_at = excluded.server_updated_at"
    ))
    .bind(&notification.id)
    .bind(&notification.server_id)
    .bind(&notification.task_id)
    .bind(notification.kind)
    .bind(notification.fire_date)
    .bind(&notification.correlation_id)
    .bind(notification.updated_at)
    .bind(notification.server_id.as_ref().map(|_| notification.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_by_server_id(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM notification_requests WHERE server_id = ?1")
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Repository for notification requests.
#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        NotificationRepository { pool }
    }

    pub async fn list_for_task(&self, task_id: &str) -> DbResult<Vec<NotificationRequest>> {
        let rows = sqlx::query_as::<_, NotificationRequest>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification_requests \
             WHERE task_id = ?1 ORDER BY fire_date ASC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> DbResult<Option<NotificationRequest>> {
        let row = sqlx::query_as::<_, NotificationRequest>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification_requests WHERE server_id = ?1"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM notification_requests")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
