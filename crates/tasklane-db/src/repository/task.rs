//! # Task Repository
//!
//! Tasks are the parents of every other synced child row. Deleting one
//! cascades to its checklist items, notifications and shares through the
//! schema's `ON DELETE CASCADE` foreign keys.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Task Lifecycle                                 │
//! │                                                                         │
//! │  create_local ──► (server_id NULL, correlation_id set)                  │
//! │        │                                                                │
//! │        ▼  first sync echoes clientId                                    │
//! │  upsert_synced ──► (server_id set, immutable from here on)              │
//! │        │                                                                │
//! │        ├── mark_removed ──► trash ── restore ──┐                        │
//! │        │                      │                │                        │
//! │        │                      ▼                │                        │
//! │        │               purge_removed           │                        │
//! │        ▼                                       │                        │
//! │  delete_by_server_id (server delete) ◄─────────┘                        │
//! │        └── children removed by cascade                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use tasklane_core::validation::{validate_details, validate_task_name};
use tasklane_core::{Completion, CoreError, NewTask, ShareRole, Task};

use super::SyncMeta;
use crate::error::DbResult;

const TASK_COLUMNS: &str = "id, server_id, folder_id, name, details, completion, is_important, \
     is_pinned, target_date, has_time, is_removed, share_role, correlation_id, created_at, updated_at";

// =============================================================================
// Connection-level operations
// =============================================================================

pub async fn find_sync_meta(
    conn: &mut SqliteConnection,
    server_id: &str,
) -> DbResult<Option<SyncMeta>> {
    let meta = sqlx::query_as::<_, SyncMeta>("SELECT id, server_updated_at FROM tasks WHERE server_id = ?1")
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
        "SELECT id FROM tasks WHERE correlation_id = ?1 AND server_id IS NULL",
    )
    .bind(correlation_id)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// Inserts a row as-is. Used for local creation and snapshot import.
pub async fn insert_local(conn: &mut SqliteConnection, task: &Task) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO tasks ({TASK_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
    ))
    .bind(&task.id)
    .bind(&task.server_id)
    .bind(&task.folder_id)
    .bind(&task.name)
    .bind(&task.details)
    .bind(task.completion)
    .bind(task.is_important)
    .bind(task.is_pinned)
    .bind(task.target_date)
    .bind(task.has_time)
    .bind(task.is_removed)
    .bind(task.share_role)
    .bind(&task.correlation_id)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Inserts or overwrites a task by local id from a server record.
///
/// An existing row keeps its local id, `created_at` and `correlation_id`.
/// `task.updated_at` is recorded as the server timestamp of the row.
pub async fn upsert_synced(conn: &mut SqliteConnection, task: &Task) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO tasks ({TASK_COLUMNS}, server_updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
         ON CONFLICT(id) DO UPDATE SET \
            server_id = excluded.server_id, \
            folder_id = excluded.folder_id, \
            name = excluded.name, \
            details = excluded.details, \
            completion = excluded.completion, \
            is_important = excluded.is_important, \
            is_pinned = excluded.is_pinned, \
            target_date = excluded.target_date, \
            has_time = excluded.has_time, \
            is_removed = excluded.is_removed, \
            share_role = excluded.share_role, \
            updated_at = excluded.updated_at, \
            server_updated_at = excluded.server_updated_at"
    ))
    .bind(&task.id)
    .bind(&task.server_id)
    .bind(&task.folder_id)
    .bind(&task.name)
    .bind(&task.details)
    .bind(task.completion)
    .bind(task.is_important)
    .bind(task.is_pinned)
    .bind(task.target_date)
    .bind(task.has_time)
    .bind(task.is_removed)
    .bind(task.share_role)
    .bind(&task.correlation_id)
    .bind(task.created_at)
    .bind(task.updated_at)
    .bind(task.server_id.as_ref().map(|_| task.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Removes the task bound to `server_id` together with all its children.
pub async fn delete_by_server_id(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM tasks WHERE server_id = ?1")
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_all(conn: &mut SqliteConnection) -> DbResult<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC"
    ))
    .fetch_all(conn)
    .await?;
    Ok(tasks)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for task operations.
#[derive(Debug, Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TaskRepository { pool }
    }

    /// All tasks, including removed ones.
    pub async fn list(&self) -> DbResult<Vec<Task>> {
        let mut conn = self.pool.acquire().await?;
        list_all(&mut conn).await
    }

    /// Tasks of one folder that are not in the trash.
    pub async fn list_in_folder(&self, folder_id: &str) -> DbResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE folder_id = ?1 AND is_removed = 0 \
             ORDER BY is_pinned DESC, created_at ASC"
        ))
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    pub async fn get(&self, id: &str) -> DbResult<Task> {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()).into())
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> DbResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE server_id = ?1"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    /// Creates an optimistic task: no server id, fresh correlation id.
    pub async fn create_local(&self, input: NewTask) -> DbResult<Task> {
        validate_task_name(&input.name).map_err(CoreError::from)?;
        validate_details(&input.details).map_err(CoreError::from)?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            server_id: None,
            folder_id: input.folder_id,
            name: input.name.trim().to_string(),
            details: input.details,
            completion: input.completion,
            is_important: input.is_important,
            is_pinned: input.is_pinned,
            target_date: input.target_date,
            has_time: input.has_time,
            is_removed: false,
            share_role: ShareRole::Owner,
            correlation_id: Some(Uuid::new_v4().to_string()),
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.pool.acquire().await?;
        insert_local(&mut conn, &task).await?;
        debug!(id = %task.id, "Created local task");
        Ok(task)
    }

    pub async fn set_completion(&self, id: &str, completion: Completion) -> DbResult<()> {
        let result = sqlx::query("UPDATE tasks SET completion = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(completion)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        ensure_found(result.rows_affected(), id)
    }

    /// Moves a task to the trash (soft delete).
    pub async fn mark_removed(&self, id: &str) -> DbResult<()> {
        self.set_removed(id, true).await
    }

    /// Takes a task back out of the trash.
    pub async fn restore(&self, id: &str) -> DbResult<()> {
        self.set_removed(id, false).await
    }

    async fn set_removed(&self, id: &str, removed: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE tasks SET is_removed = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(removed)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        ensure_found(result.rows_affected(), id)
    }

    /// Permanently deletes every task in the trash. Children cascade.
    pub async fn purge_removed(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE is_removed = 1")
            .execute(&self.pool)
            .await?;
        let purged = result.rows_affected();
        info!(purged, "Purged removed tasks");
        Ok(purged)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Rows not yet bound to a server id.
    pub async fn count_unsynced(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE server_id IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn ensure_found(rows_affected: u64, id: &str) -> DbResult<()> {
    if rows_affected == 0 {
        return Err(CoreError::TaskNotFound(id.to_string()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, DbError};
    use tasklane_core::NewChecklistItem;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn new_task(name: &str) -> NewTask {
        NewTask {
            name: name.into(),
            completion: Completion::Unchecked,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_local_is_optimistic() {
        let db = db().await;
        let task = db.tasks().create_local(new_task("Buy milk")).await.unwrap();
        assert!(!task.is_synced());
        assert!(task.correlation_id.is_some());
        assert_eq!(db.tasks().count_unsynced().await.unwrap(), 1);
        assert!(db.tasks().create_local(new_task("")).await.is_err());
    }

    #[tokio::test]
    async fn test_soft_delete_restore_and_purge() {
        let db = db().await;
        let repo = db.tasks();
        let keep = repo.create_local(new_task("Keep")).await.unwrap();
        let trash = repo.create_local(new_task("Trash")).await.unwrap();
        db.items()
            .create_local(NewChecklistItem {
                task_id: trash.id.clone(),
                name: "child".into(),
            })
            .await
            .unwrap();

        repo.mark_removed(&keep.id).await.unwrap();
        repo.restore(&keep.id).await.unwrap();
        repo.mark_removed(&trash.id).await.unwrap();
        assert!(repo.get(&trash.id).await.unwrap().is_removed);

        assert_eq!(repo.purge_removed().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(db.items().list_for_task(&trash.id).await.unwrap().is_empty());
        assert!(matches!(
            repo.mark_removed("missing").await,
            Err(DbError::Rule(CoreError::TaskNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_local_edits_keep_server_timestamp() {
        let db = db().await;
        let mut task = db.tasks().create_local(new_task("Shared")).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        assert!(find_sync_meta(&mut conn, "t1").await.unwrap().is_none());

        let served = "2026-01-01T10:00:00Z".parse().unwrap();
        task.server_id = Some("t1".into());
        task.updated_at = served;
        upsert_synced(&mut conn, &task).await.unwrap();
        drop(conn);

        db.tasks().set_completion(&task.id, Completion::Checked).await.unwrap();
        db.tasks().mark_removed(&task.id).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let meta = find_sync_meta(&mut conn, "t1").await.unwrap().unwrap();
        assert_eq!(meta.id, task.id);
        assert_eq!(meta.server_updated_at, Some(served));
        drop(conn);
        assert!(db.tasks().get(&task.id).await.unwrap().updated_at > served);
    }

    #[tokio::test]
    async fn test_delete_by_server_id_cascades() {
        let db = db().await;
        let mut task = db.tasks().create_local(new_task("Shared")).await.unwrap();
        task.server_id = Some("t1".into());
        let mut conn = db.pool().acquire().await.unwrap();
        upsert_synced(&mut conn, &task).await.unwrap();
        drop(conn);

        db.items()
            .create_local(NewChecklistItem {
                task_id: task.id.clone(),
                name: "one".into(),
            })
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(delete_by_server_id(&mut conn, "t1").await.unwrap());
        assert!(!delete_by_server_id(&mut conn, "t1").await.unwrap());
        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checklist_items")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
