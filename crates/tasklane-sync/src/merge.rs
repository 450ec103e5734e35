//! Per-kind store bindings for the reconciliation engine.
//!
//! Each wire record knows how to find its local row, resolve its parent and
//! write itself through the connection-level functions of `tasklane-db`.
//! The engine stays generic over [`MergeTarget`].

use async_trait::async_trait;
use sqlx::SqliteConnection;
use tasklane_core::wire::{FolderRecord, ItemRecord, ListRecord, NotificationRecord, ShareRecord};
use tasklane_core::Resource;
use tasklane_db::repository::{folder, item, notification, share, task, SyncMeta};
use tasklane_db::{DbError, DbResult};
use tracing::debug;

/// Where a record's parent lives locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Local id of the parent, or `None` for records without one.
    Ready(Option<String>),
    /// The parent Task with this server id is not in the store.
    MissingParent(String),
}

/// A record the reconciliation engine can merge into the local store.
#[async_trait]
pub trait MergeTarget: Resource {
    /// Local row already bound to `server_id`.
    async fn find_bound(conn: &mut SqliteConnection, server_id: &str) -> DbResult<Option<SyncMeta>>;

    /// Optimistic local row carrying `client_id` as its correlation id.
    async fn find_optimistic(
        _conn: &mut SqliteConnection,
        _client_id: &str,
    ) -> DbResult<Option<String>> {
        Ok(None)
    }

    /// Finds the local parent. Task children resolve the Task named by
    /// [`Resource::parent_server_id`]; records without one need nothing.
    async fn resolve(&self, conn: &mut SqliteConnection) -> DbResult<Resolution> {
        match self.parent_server_id() {
            Some(task_server_id) => resolve_task(conn, task_server_id).await,
            None => Ok(Resolution::Ready(None)),
        }
    }

    /// Writes the record under `local_id`. `parent` is the value
    /// [`MergeTarget::resolve`] returned.
    async fn write(
        &self,
        conn: &mut SqliteConnection,
        local_id: &str,
        parent: Option<&str>,
    ) -> DbResult<()>;

    async fn remove(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool>;
}

async fn resolve_task(conn: &mut SqliteConnection, task_server_id: &str) -> DbResult<Resolution> {
    Ok(match task::find_sync_meta(conn, task_server_id).await? {
        Some(meta) => Resolution::Ready(Some(meta.id)),
        None => Resolution::MissingParent(task_server_id.to_string()),
    })
}

fn require_parent<'a>(parent: Option<&'a str>, record: &str) -> DbResult<&'a str> {
    parent.ok_or_else(|| DbError::Internal(format!("{record} written without its parent task")))
}

#[async_trait]
impl MergeTarget for FolderRecord {
    async fn find_bound(conn: &mut SqliteConnection, server_id: &str) -> DbResult<Option<SyncMeta>> {
        folder::find_sync_meta(conn, server_id).await
    }

    async fn find_optimistic(
        conn: &mut SqliteConnection,
        client_id: &str,
    ) -> DbResult<Option<String>> {
        folder::find_unsynced_by_correlation(conn, client_id).await
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        local_id: &str,
        _parent: Option<&str>,
    ) -> DbResult<()> {
        folder::upsert_synced(conn, &self.to_folder(local_id)).await
    }

    async fn remove(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
        folder::delete_by_server_id(conn, server_id).await
    }
}

#[async_trait]
impl MergeTarget for ListRecord {
    async fn find_bound(conn: &mut SqliteConnection, server_id: &str) -> DbResult<Option<SyncMeta>> {
        task::find_sync_meta(conn, server_id).await
    }

    async fn find_optimistic(
        conn: &mut SqliteConnection,
        client_id: &str,
    ) -> DbResult<Option<String>> {
        task::find_unsynced_by_correlation(conn, client_id).await
    }

    /// Tasks have no parent Task. A folder that is not (yet) local leaves
    /// the task unfiled rather than blocking it.
    async fn resolve(&self, conn: &mut SqliteConnection) -> DbResult<Resolution> {
        let Some(folder_sid) = self.folder_id.as_deref() else {
            return Ok(Resolution::Ready(None));
        };
        let folder = folder::find_sync_meta(conn, folder_sid).await?;
        if folder.is_none() {
            debug!(task = %self.id, folder = folder_sid, "Folder not local, task left unfiled");
        }
        Ok(Resolution::Ready(folder.map(|meta| meta.id)))
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        local_id: &str,
        parent: Option<&str>,
    ) -> DbResult<()> {
        task::upsert_synced(conn, &self.to_task(local_id, parent.map(str::to_string))).await
    }

    async fn remove(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
        task::delete_by_server_id(conn, server_id).await
    }
}

#[async_trait]
impl MergeTarget for ItemRecord {
    async fn find_bound(conn: &mut SqliteConnection, server_id: &str) -> DbResult<Option<SyncMeta>> {
        item::find_sync_meta(conn, server_id).await
    }

    async fn find_optimistic(
        conn: &mut SqliteConnection,
        client_id: &str,
    ) -> DbResult<Option<String>> {
        item::find_unsynced_by_correlation(conn, client_id).await
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        local_id: &str,
        parent: Option<&str>,
    ) -> DbResult<()> {
        let task_id = require_parent(parent, "checklist item")?;
        item::upsert_synced(conn, &self.to_item(local_id, task_id)).await
    }

    async fn remove(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
        item::delete_by_server_id(conn, server_id).await
    }
}

#[async_trait]
impl MergeTarget for NotificationRecord {
    async fn find_bound(conn: &mut SqliteConnection, server_id: &str) -> DbResult<Option<SyncMeta>> {
        notification::find_sync_meta(conn, server_id).await
    }

    async fn find_optimistic(
        conn: &mut SqliteConnection,
        client_id: &str,
    ) -> DbResult<Option<String>> {
        notification::find_unsynced_by_correlation(conn, client_id).await
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        local_id: &str,
        parent: Option<&str>,
    ) -> DbResult<()> {
        let task_id = require_parent(parent, "notification")?;
        notification::upsert_synced(conn, &self.to_notification(local_id, task_id)).await
    }

    async fn remove(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
        notification::delete_by_server_id(conn, server_id).await
    }
}

// Shares are only ever created by the service, so there is no optimistic row
// to adopt.
#[async_trait]
impl MergeTarget for ShareRecord {
    async fn find_bound(conn: &mut SqliteConnection, server_id: &str) -> DbResult<Option<SyncMeta>> {
        share::find_sync_meta(conn, server_id).await
    }

    async fn write(
        &self,
        conn: &mut SqliteConnection,
        local_id: &str,
        parent: Option<&str>,
    ) -> DbResult<()> {
        let task_id = require_parent(parent, "share")?;
        // A server id lives in one table only; drop the other flavour first.
        match self {
            ShareRecord::Link(link) => {
                if share::delete_member_by_server_id(conn, &link.id).await? {
                    debug!(share = %link.id, "Share member became a link");
                }
                share::upsert_link(conn, &link.to_link(local_id, task_id)).await
            }
            ShareRecord::Member(member) => {
                if share::delete_link_by_server_id(conn, &member.id).await? {
                    debug!(share = %member.id, "Share link became a member");
                }
                share::upsert_member(conn, &member.to_member(local_id, task_id)).await
            }
        }
    }

    async fn remove(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
        share::delete_by_server_id(conn, server_id).await
    }
}
