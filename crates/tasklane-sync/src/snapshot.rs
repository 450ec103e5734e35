//! # Snapshot Client
//!
//! Point-in-time copies of every resource kind, in one schema:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Snapshot Paths                                  │
//! │                                                                         │
//! │  GET /sync/snapshot ──► Snapshot ──► ReconciliationEngine (bootstrap)   │
//! │                                                                         │
//! │  local store ──► export_local ──► tasklane-backup.json                  │
//! │                                   (local ids, no notifications/shares)  │
//! │                                                                         │
//! │  tasklane-backup.json ──► import_local ──► new local-only rows          │
//! │                                            (server ids never assigned)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Import is additive: every imported task and item is a disconnected copy
//! with fresh local and correlation ids. Running it twice yields two copies.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tasklane_core::wire::{FolderRecord, ItemRecord, ListRecord};
use tasklane_core::{ChecklistItem, Snapshot, Task};
use tasklane_db::repository::{folder, item, task};
use tasklane_db::{Database, DbError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{BackupError, NetResult, SyncResult};
use crate::http::ApiClient;

/// Counts reported by [`SnapshotClient::import_local`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub tasks: usize,
    pub items: usize,
    /// Items whose list was not part of the file.
    pub skipped_items: usize,
}

/// Fetches server snapshots and moves local snapshots to and from files.
#[derive(Debug, Clone)]
pub struct SnapshotClient {
    api: ApiClient,
    db: Database,
    endpoint: Url,
}

impl SnapshotClient {
    pub fn new(api: ApiClient, db: Database) -> SyncResult<Self> {
        let endpoint = api.endpoint(&["sync", "snapshot"])?;
        Ok(SnapshotClient { api, db, endpoint })
    }

    /// `GET /sync/snapshot`.
    pub async fn fetch_full_snapshot(&self, cancel: &CancellationToken) -> NetResult<Snapshot> {
        debug!(url = %self.endpoint, "Fetching full snapshot");
        let snapshot: Snapshot = self.api.get_json(self.endpoint.clone(), cancel).await?;
        info!(
            folders = snapshot.folders.len(),
            lists = snapshot.lists.len(),
            items = snapshot.items.len(),
            notifications = snapshot.notifications.len(),
            shares = snapshot.shares.len(),
            "Fetched full snapshot"
        );
        Ok(snapshot)
    }

    /// Writes the local store to `path` as pretty JSON and returns the path.
    pub async fn export_local(&self, path: &Path) -> Result<PathBuf, BackupError> {
        let snapshot = self.local_snapshot().await?;
        let json = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::io(parent, e))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| BackupError::io(path, e))?;

        info!(
            path = %path.display(),
            tasks = snapshot.lists.len(),
            items = snapshot.items.len(),
            "Exported local snapshot"
        );
        Ok(path.to_path_buf())
    }

    /// Reads an exported file and adds its tasks and items as new local rows.
    pub async fn import_local(&self, path: &Path) -> Result<ImportSummary, BackupError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| BackupError::io(path, e))?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;

        let mut tx = self.db.begin().await?;

        let existing_by_name: HashMap<String, String> = folder::list_all(&mut tx)
            .await?
            .into_iter()
            .map(|f| (f.name, f.id))
            .collect();
        let file_folder_names: HashMap<&str, &str> = snapshot
            .folders
            .iter()
            .map(|f| (f.id.as_str(), f.name.as_str()))
            .collect();

        let now = Utc::now();
        let mut summary = ImportSummary::default();
        let mut task_ids: HashMap<&str, String> = HashMap::new();

        for record in &snapshot.lists {
            let folder_id = record
                .folder_id
                .as_deref()
                .and_then(|id| file_folder_names.get(id))
                .and_then(|name| existing_by_name.get(*name))
                .cloned();

            let local_id = Uuid::new_v4().to_string();
            let copy = Task {
                server_id: None,
                correlation_id: Some(Uuid::new_v4().to_string()),
                created_at: now,
                updated_at: now,
                ..record.to_task(&local_id, folder_id)
            };
            task::insert_local(&mut tx, &copy).await?;
            task_ids.insert(record.id.as_str(), local_id);
            summary.tasks += 1;
        }

        for record in &snapshot.items {
            let Some(task_id) = task_ids.get(record.list_id.as_str()) else {
                warn!(item = %record.id, list = %record.list_id, "Skipping item of unknown list");
                summary.skipped_items += 1;
                continue;
            };
            let copy = ChecklistItem {
                server_id: None,
                correlation_id: Some(Uuid::new_v4().to_string()),
                updated_at: now,
                ..record.to_item(&Uuid::new_v4().to_string(), task_id)
            };
            item::insert_local(&mut tx, &copy).await?;
            summary.items += 1;
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            path = %path.display(),
            tasks = summary.tasks,
            items = summary.items,
            skipped_items = summary.skipped_items,
            "Imported snapshot file"
        );
        Ok(summary)
    }

    async fn local_snapshot(&self) -> Result<Snapshot, BackupError> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
        let folders = folder::list_all(&mut conn).await?;
        let tasks = task::list_all(&mut conn).await?;
        let items = item::list_all(&mut conn).await?;

        Ok(Snapshot {
            now: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            next_cursor: None,
            folders: folders.iter().map(FolderRecord::from_local).collect(),
            lists: tasks.iter().map(ListRecord::from_local).collect(),
            items: items.iter().map(ItemRecord::from_local).collect(),
            notifications: Vec::new(),
            shares: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{api_client, memory_db};
    use tasklane_core::{Completion, NewChecklistItem, NewFolder, NewTask, Rgba};

    async fn client(db: &Database) -> SnapshotClient {
        let (api, _) = api_client("http://127.0.0.1:9", "a1");
        SnapshotClient::new(api, db.clone()).unwrap()
    }

    async fn seed(db: &Database) -> Task {
        let work = db
            .folders()
            .create_local(NewFolder {
                name: "Work".into(),
                color: Rgba::new(0x33, 0x66, 0xFF, 0xFF),
                is_visible: true,
            })
            .await
            .unwrap();
        let task = db
            .tasks()
            .create_local(NewTask {
                folder_id: Some(work.id.clone()),
                name: "Write report".into(),
                details: "Q3 numbers".into(),
                completion: Completion::Unchecked,
                target_date: Some("2026-03-01T09:00:00Z".parse().unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();
        for name in ["Outline", "Draft"] {
            db.items()
                .create_local(NewChecklistItem {
                    task_id: task.id.clone(),
                    name: name.into(),
                })
                .await
                .unwrap();
        }
        task
    }

    #[tokio::test]
    async fn test_export_import_round_trip_makes_disconnected_copies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backups").join("tasklane.json");

        let source = memory_db().await;
        let original = seed(&source).await;
        let written = client(&source).await.export_local(&path).await.unwrap();
        assert_eq!(written, path);

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(!json.contains("notifications"));
        assert!(!json.contains("shares"));

        let target = memory_db().await;
        target
            .folders()
            .create_local(NewFolder {
                name: "Work".into(),
                color: Rgba::default(),
                is_visible: true,
            })
            .await
            .unwrap();

        let summary = client(&target).await.import_local(&path).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                tasks: 1,
                items: 2,
                skipped_items: 0
            }
        );

        let tasks = target.tasks().list().await.unwrap();
        assert_eq!(tasks.len(), 1);
        let copy = &tasks[0];
        assert_ne!(copy.id, original.id);
        assert!(copy.server_id.is_none());
        assert_eq!(copy.name, original.name);
        assert_eq!(copy.details, original.details);
        assert_eq!(copy.completion, original.completion);
        assert_eq!(copy.target_date, original.target_date);
        assert!(copy.folder_id.is_some());

        let items = target.items().list_for_task(&copy.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.server_id.is_none()));
        assert_eq!(items[0].name, "Outline");
    }

    #[tokio::test]
    async fn test_import_unfiles_unknown_folders_and_skips_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hand-made.json");
        std::fs::write(
            &path,
            r##"{
                "now": "2026-01-01T00:00:00Z",
                "folders": [{"id": "old-f", "name": "Elsewhere", "color": "#000000"}],
                "lists": [{"id": "old-t", "folderId": "old-f", "name": "Call mom", "completed": 1}],
                "items": [
                    {"id": "i1", "listId": "old-t", "name": "Dial"},
                    {"id": "i2", "listId": "missing", "name": "Lost"}
                ]
            }"##,
        )
        .unwrap();

        let db = memory_db().await;
        let summary = client(&db).await.import_local(&path).await.unwrap();
        assert_eq!(summary.tasks, 1);
        assert_eq!(summary.items, 1);
        assert_eq!(summary.skipped_items, 1);

        let tasks = db.tasks().list().await.unwrap();
        assert!(tasks[0].folder_id.is_none());
        assert_eq!(tasks[0].completion, Completion::Unchecked);
        assert!(tasks[0].correlation_id.is_some());

        let items = db.items().list_for_task(&tasks[0].id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].server_id.is_none());
        assert!(items[0].correlation_id.is_some());
        let server_stamped: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM checklist_items WHERE server_updated_at IS NOT NULL",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(server_stamped, 0);
    }

    #[tokio::test]
    async fn test_import_errors() {
        let db = memory_db().await;
        let snapshots = client(&db).await;
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("nope.json");
        let err = snapshots.import_local(&missing).await.unwrap_err();
        assert!(matches!(err, BackupError::Io { ref path, .. } if path == &missing));

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "{not json").unwrap();
        let err = snapshots.import_local(&garbage).await.unwrap_err();
        assert!(matches!(err, BackupError::Format(_)));
        assert_eq!(db.tasks().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_full_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sync/snapshot")
            .match_header("authorization", "Bearer a1")
            .with_status(200)
            .with_body(
                r#"{
                    "now": "2026-02-01T00:00:00Z",
                    "nextCursor": "c-42",
                    "folders": [{"id": "f1", "name": "Inbox", "system": true}],
                    "lists": [{"id": "t1", "folderId": "f1", "name": "Buy milk", "completed": 0}],
                    "items": [],
                    "notifications": [{"id": "n1", "listId": "t1", "type": "at_time",
                                       "fireDate": "2026-02-02T09:00:00Z"}],
                    "shares": []
                }"#,
            )
            .create_async()
            .await;

        let db = memory_db().await;
        let (api, _) = api_client(&server.url(), "a1");
        let snapshot = SnapshotClient::new(api, db)
            .unwrap()
            .fetch_full_snapshot(&CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(snapshot.next_cursor.as_deref(), Some("c-42"));
        assert!(snapshot.folders[0].system);
        assert_eq!(snapshot.notifications.len(), 1);
    }
}
