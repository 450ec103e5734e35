//! # Folder Repository

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use tasklane_core::validation::validate_folder_name;
use tasklane_core::{CoreError, Folder, NewFolder};

use super::SyncMeta;
use crate::error::{DbError, DbResult};

const FOLDER_COLUMNS: &str = "id, server_id, name, color, is_visible, is_locked, is_system, \
     is_shared, sort_order, correlation_id, updated_at";

// =============================================================================
// Connection-level operations
// =============================================================================

/// Local id and timestamp of the folder bound to `server_id`.
pub async fn find_sync_meta(
    conn: &mut SqliteConnection,
    server_id: &str,
) -> DbResult<Option<SyncMeta>> {
    let meta = sqlx::query_as::<_, SyncMeta>("SELECT id, server_updated_at FROM folders WHERE server_id = ?1")
        .bind(server_id)
        .fetch_optional(conn)
        .await?;
    Ok(meta)
}

/// Optimistic folder created on this device and not yet bound.
pub async fn find_unsynced_by_correlation(
    conn: &mut SqliteConnection,
    correlation_id: &str,
) -> DbResult<Option<String>> {
    let id = sqlx::query_scalar::<_, String>(
        "SELECT id FROM folders WHERE correlation_id = ?1 AND server_id IS NULL",
    )
    .bind(correlation_id)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// Inserts a folder created on this device.
pub async fn insert_local(conn: &mut SqliteConnection, folder: &Folder) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO folders ({FOLDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    ))
    .bind(&folder.id)
    .bind(&folder.server_id)
    .bind(&folder.name)
    .bind(folder.color)
    .bind(folder.is_visible)
    .bind(folder.is_locked)
    .bind(folder.is_system)
    .bind(folder.is_shared)
    .bind(folder.sort_order)
    .bind(&folder.correlation_id)
    .bind(folder.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Inserts or overwrites a folder by local id from a server record.
///
/// The local id and correlation id of an existing row are never touched.
pub async fn upsert_synced(conn: &mut SqliteConnection, folder: &Folder) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO folders (
            id, server_id, name, color, is_visible, is_locked, is_system,
            is_shared, sort_order, correlation_id, updated_at, server_updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(id) DO UPDATE SET
            server_id = excluded.server_id,
            name = excluded.name,
            color = excluded.color,
            is_visible = excluded.is_visible,
            is_locked = excluded.is_locked,
            is_system = excluded.is_system,
            is_shared = excluded.is_shared,
            sort_order = excluded.sort_order,
            updated_at = excluded.updated_at,
            server_updated_at = excluded.server_updated_at
        "#,
    )
    .bind(&folder.id)
    .bind(&folder.server_id)
    .bind(&folder.name)
    .bind(folder.color)
    .bind(folder.is_visible)
    .bind(folder.is_locked)
    .bind(folder.is_system)
    .bind(folder.is_shared)
    .bind(folder.sort_order)
    .bind(&folder.correlation_id)
    .bind(folder.updated_at)
    .bind(folder.server_id.as_ref().map(|_| folder.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Removes the folder bound to `server_id`. Its tasks become unfiled.
pub async fn delete_by_server_id(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM folders WHERE server_id = ?1")
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_all(conn: &mut SqliteConnection) -> DbResult<Vec<Folder>> {
    let folders = sqlx::query_as::<_, Folder>(&format!(
        "SELECT {FOLDER_COLUMNS} FROM folders ORDER BY sort_order ASC, name ASC"
    ))
    .fetch_all(conn)
    .await?;
    Ok(folders)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for folder operations.
#[derive(Debug, Clone)]
pub struct FolderRepository {
    pool: SqlitePool,
}

impl FolderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        FolderRepository { pool }
    }

    /// All folders in display order.
    pub async fn list(&self) -> DbResult<Vec<Folder>> {
        let mut conn = self.pool.acquire().await?;
        list_all(&mut conn).await
    }

    pub async fn get(&self, id: &str) -> DbResult<Folder> {
        sqlx::query_as::<_, Folder>(&format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Folder", id))
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> DbResult<Option<Folder>> {
        let folder = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE server_id = ?1"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(folder)
    }

    /// Creates an optimistic folder at the end of the display order.
    pub async fn create_local(&self, input: NewFolder) -> DbResult<Folder> {
        validate_folder_name(&input.name).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;
        let next_order: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(sort_order) + 1, 0) FROM folders")
                .fetch_one(&mut *tx)
                .await?;

        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            server_id: None,
            name: input.name.trim().to_string(),
            color: input.color,
            is_visible: input.is_visible,
            is_locked: false,
            is_system: false,
            is_shared: false,
            sort_order: next_order,
            correlation_id: Some(Uuid::new_v4().to_string()),
            updated_at: Utc::now(),
        };
        insert_local(&mut tx, &folder).await?;
        tx.commit().await?;

        debug!(id = %folder.id, order = folder.sort_order, "Created local folder");
        Ok(folder)
    }

    /// Moves a folder to `new_index` and renumbers all folders `0..n`.
    pub async fn reorder(&self, id: &str, new_index: usize) -> DbResult<Vec<Folder>> {
        let mut tx = self.pool.begin().await?;
        let mut folders = list_all(&mut tx).await?;

        let from = folders
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| DbError::not_found("Folder", id))?;
        let moved = folders.remove(from);
        let to = new_index.min(folders.len());
        folders.insert(to, moved);

        let now = Utc::now();
        for (rank, folder) in folders.iter_mut().enumerate() {
            let rank = rank as i64;
            if folder.sort_order != rank {
                folder.sort_order = rank;
                folder.updated_at = now;
                sqlx::query("UPDATE folders SET sort_order = ?2, updated_at = ?3 WHERE id = ?1")
                    .bind(&folder.id)
                    .bind(rank)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        info!(id = %id, from, to, "Folder reordered");
        Ok(folders)
    }

    /// Deletes a user folder. System folders are refused.
    pub async fn delete_local(&self, id: &str) -> DbResult<()> {
        let folder = self.get(id).await?;
        if folder.is_system {
            return Err(CoreError::SystemFolder(id.to_string()).into());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM folders WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        // Close the gap left in the ranking.
        sqlx::query("UPDATE folders SET sort_order = sort_order - 1 WHERE sort_order > ?1")
            .bind(folder.sort_order)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM folders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use tasklane_core::Rgba;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn new_folder(name: &str) -> NewFolder {
        NewFolder {
            name: name.into(),
            color: Rgba::new(10, 20, 30, 255),
            is_visible: true,
        }
    }

    #[tokio::test]
    async fn test_create_local_appends_and_is_unsynced() {
        let db = db().await;
        let a = db.folders().create_local(new_folder("Inbox")).await.unwrap();
        let b = db.folders().create_local(new_folder("Work")).await.unwrap();

        assert_eq!(a.sort_order, 0);
        assert_eq!(b.sort_order, 1);
        assert!(a.server_id.is_none());
        assert!(a.correlation_id.is_some());
        assert!(db.folders().create_local(new_folder("  ")).await.is_err());
    }

    #[tokio::test]
    async fn test_reorder_renumbers_densely() {
        let db = db().await;
        let repo = db.folders();
        let a = repo.create_local(new_folder("A")).await.unwrap();
        repo.create_local(new_folder("B")).await.unwrap();
        repo.create_local(new_folder("C")).await.unwrap();

        let folders = repo.reorder(&a.id, 99).await.unwrap();
        let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["B", "C", "A"]);

        let orders: Vec<_> = repo.list().await.unwrap().iter().map(|f| f.sort_order).collect();
        assert_eq!(orders, [0, 1, 2]);
    }

    #[tokio::test]
    async fn test_delete_local_closes_gap_and_protects_system() {
        let db = db().await;
        let repo = db.folders();
        let a = repo.create_local(new_folder("A")).await.unwrap();
        let b = repo.create_local(new_folder("B")).await.unwrap();
        repo.create_local(new_folder("C")).await.unwrap();

        repo.delete_local(&a.id).await.unwrap();
        let orders: Vec<_> = repo.list().await.unwrap().iter().map(|f| f.sort_order).collect();
        assert_eq!(orders, [0, 1]);

        let mut system = repo.get(&b.id).await.unwrap();
        system.is_system = true;
        let mut conn = db.pool().acquire().await.unwrap();
        upsert_synced(&mut conn, &system).await.unwrap();
        drop(conn);

        let err = repo.delete_local(&b.id).await.unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::SystemFolder(_))));
    }

    #[tokio::test]
    async fn test_upsert_synced_keeps_correlation_id() {
        let db = db().await;
        let local = db.folders().create_local(new_folder("Home")).await.unwrap();

        let mut bound = local.clone();
        bound.server_id = Some("f-srv".into());
        bound.correlation_id = None;
        bound.sort_order = 5;
        let mut conn = db.pool().acquire().await.unwrap();
        upsert_synced(&mut conn, &bound).await.unwrap();
        assert!(find_unsynced_by_correlation(&mut conn, local.correlation_id.as_deref().unwrap())
            .await
            .unwrap()
            .is_none());
        drop(conn);

        let stored = db.folders().get_by_server_id("f-srv").await.unwrap().unwrap();
        assert_eq!(stored.id, local.id);
        assert_eq!(stored.sort_order, 5);
        assert_eq!(stored.correlation_id, local.correlation_id);
    }
}
