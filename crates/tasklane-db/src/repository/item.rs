//! # Checklist Item Repository

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use tasklane_core::validation::{validate_checklist_capacity, validate_item_name};
use tasklane_core::{ChecklistItem, CoreError, NewChecklistItem};

use super::SyncMeta;
use crate::error::DbResult;

const ITEM_COLUMNS: &str =
    "id, server_id, task_id, sequence, name, is_completed, correlation_id, updated_at";

pub async fn find_sync_meta(
    conn: &mut SqliteConnection,
    server_id: &str,
) -> DbResult<Option<SyncMeta>> {
    let meta = sqlx::query_as::<_, SyncMeta>(
        "SELECT id, server_updated_at FROM checklist_items WHERE server_id = ?1",
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
        "SELECT id FROM checklist_items WHERE correlation_id = ?1 AND server_id IS NULL",
    )
    .bind(correlation_id)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// Inserts an item created on this device or restored from a backup.
pub async fn insert_local(conn: &mut SqliteConnection, item: &ChecklistItem) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO checklist_items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
    ))
    .bind(&item.id)
    .bind(&item.server_id)
    .bind(&item.task_id)
    .bind(item.sequence)
    .bind(&item.name)
    .bind(item.is_completed)
    .bind(&item.correlation_id)
    .bind(item.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Inserts or overwrites an item by local id from a server record, keeping
/// its correlation id.
pub async fn upsert_synced(conn: &mut SqliteConnection, item: &ChecklistItem) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO checklist_items ({ITEM_COLUMNS}, server_updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(id) DO UPDATE SET \
            server_id = excluded.server_id, \
            task_id = excluded.task_id, \
            sequence = excluded.sequence, \
            name = excluded.name, \
            is_completed = excluded.is_completed, \
            updated_at = excluded.updated_at, \
            server_updated_at = excluded.server_updated_at"
    ))
    .bind(&item.id)
    .bind(&item.server_id)
    .bind(&item.task_id)
    .bind(item.sequence)
    .bind(&item.name)
    .bind(item.is_completed)
    .bind(&item.correlation_id)
    .bind(item.updated_at)
    .bind(item.server_id.as_ref().map(|_| item.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_by_server_id(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM checklist_items WHERE server_id = ?1")
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_all(conn: &mut SqliteConnection) -> DbResult<Vec<ChecklistItem>> {
    let items = sqlx::query_as::<_, ChecklistItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM checklist_items ORDER BY task_id ASC, sequence ASC"
    ))
    .fetch_all(conn)
    .await?;
    Ok(items)
}

/// Repository for checklist item operations.
#[derive(Debug, Clone)]
pub struct ChecklistItemRepository {
    pool: SqlitePool,
}

impl ChecklistItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ChecklistItemRepository { pool }
    }

    /// Items of one task in sequence order.
    pub async fn list_for_task(&self, task_id: &str) -> DbResult<Vec<ChecklistItem>> {
        let items = sqlx::query_as::<_, ChecklistItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM checklist_items WHERE task_id = ?1 ORDER BY sequence ASC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> DbResult<Option<ChecklistItem>> {
        let item = sqlx::query_as::<_, ChecklistItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM checklist_items WHERE server_id = ?1"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// Appends an optimistic item to a task's checklist.
    pub async fn create_local(&self, input: NewChecklistItem) -> DbResult<ChecklistItem> {
        validate_item_name(&input.name).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;
        let task_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE id = ?1")
            .bind(&input.task_id)
            .fetch_optional(&mut *tx)
            .await?;
        if task_exists.is_none() {
            return Err(CoreError::TaskNotFound(input.task_id).into());
        }

        let (existing, next_sequence): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(MAX(sequence) + 1, 0) FROM checklist_items WHERE task_id = ?1",
        )
        .bind(&input.task_id)
        .fetch_one(&mut *tx)
        .await?;
        validate_checklist_capacity(existing as usize).map_err(CoreError::from)?;

        let item = ChecklistItem {
            id: Uuid::new_v4().to_string(),
            server_id: None,
            task_id: input.task_id,
            sequence: next_sequence,
            name: input.name.trim().to_string(),
            is_completed: false,
            correlation_id: Some(Uuid::new_v4().to_string()),
            updated_at: Utc::now(),
        };
        insert_local(&mut tx, &item).await?;
        tx.commit().await?;

        debug!(id = %item.id, task_id = %item.task_id, "Created local checklist item");
        Ok(item)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM checklist_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
