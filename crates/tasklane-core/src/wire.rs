//! # Wire Records
//!
//! JSON shapes exchanged with the REST service, and their mapping onto
//! local entities.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      REST Resource Endpoints                            │
//! │                                                                         │
//! │  GET    /{kind}?since=<cursor>  → Delta<Record>                         │
//! │  POST   /{kind}                 → Record          (body: Patch)         │
//! │  PATCH  /{kind}/{id}            → Record          (body: Patch)         │
//! │  DELETE /{kind}/{id}            → 204                                   │
//! │                                                                         │
//! │  kind ∈ folders | lists | items | notifications | shares                │
//! │                                                                         │
//! │  GET    /sync/snapshot          → Snapshot (every kind at once)         │
//! │                                                                         │
//! │  Delta JSON:                                                            │
//! │  { "since": "...", "now": "...",                                        │
//! │    "upserts": [ {...}, ... ],                                           │
//! │    "deletes": [ { "id": "...", "deletedAt": "..." } ] }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All field names are camelCase. Identifiers in records are always
//! **server** identifiers, except in exported snapshot files which carry
//! local ids.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{
    ChecklistItem, Completion, Folder, NotificationKind, NotificationRequest, ResourceKind, Rgba,
    ShareLink, ShareMember, ShareRole, Task,
};

// =============================================================================
// Resource Trait
// =============================================================================

/// A record type served by one REST collection.
///
/// Implemented once per resource kind so a single generic client and a
/// single reconciliation path can serve all five kinds.
pub trait Resource:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Which collection this record belongs to.
    const KIND: ResourceKind;

    /// Body sent on create/update.
    type Patch: Serialize + fmt::Debug + Send + Sync;

    /// Server identifier of this record.
    fn server_id(&self) -> &str;

    /// Last modification time on the server.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Correlation token echoed back for rows created by this client.
    fn client_id(&self) -> Option<&str> {
        None
    }

    /// Server id of the parent Task, for Task children.
    fn parent_server_id(&self) -> Option<&str> {
        None
    }
}

// =============================================================================
// Delta / Snapshot
// =============================================================================

/// A server delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: String,
    pub deleted_at: DateTime<Utc>,
}

/// Incremental changes of one resource kind since a cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta<R> {
    /// Echo of the requested cursor.
    #[serde(default)]
    pub since: Option<String>,

    /// Cursor to store once this delta is reconciled.
    #[serde(default)]
    pub now: Option<String>,

    #[serde(default = "Vec::new")]
    pub upserts: Vec<R>,

    #[serde(default)]
    pub deletes: Vec<Tombstone>,
}

impl<R> Delta<R> {
    /// A delta made only of upserts, used for snapshot portions.
    pub fn upserts_only(upserts: Vec<R>, now: Option<String>) -> Self {
        Delta {
            since: None,
            now,
            upserts,
            deletes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Every resource kind at one point in time.
///
/// Also the schema of on-device export files, where `notifications` and
/// `shares` are left empty and therefore omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub now: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    #[serde(default)]
    pub folders: Vec<FolderRecord>,

    #[serde(default)]
    pub lists: Vec<ListRecord>,

    #[serde(default)]
    pub items: Vec<ItemRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<NotificationRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shares: Vec<ShareRecord>,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Folder
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Rgba,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl FolderRecord {
    /// Local row for this record, bound to `local_id`.
    pub fn to_folder(&self, local_id: &str) -> Folder {
        Folder {
            id: local_id.to_string(),
            server_id: Some(self.id.clone()),
            name: self.name.clone(),
            color: self.color,
            is_visible: self.visible,
            is_locked: self.locked,
            is_system: self.system,
            is_shared: self.shared,
            sort_order: self.order,
            correlation_id: self.client_id.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Export form of a local folder (local id in `id`).
    pub fn from_local(folder: &Folder) -> Self {
        FolderRecord {
            id: folder.id.clone(),
            name: folder.name.clone(),
            color: folder.color,
            visible: folder.is_visible,
            locked: folder.is_locked,
            system: folder.is_system,
            shared: folder.is_shared,
            order: folder.sort_order,
            updated_at: folder.updated_at,
            client_id: None,
        }
    }
}

impl Resource for FolderRecord {
    const KIND: ResourceKind = ResourceKind::Folder;
    type Patch = FolderPatch;

    fn server_id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgba>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl FolderPatch {
    /// Full create body for a locally created folder.
    pub fn create_from(folder: &Folder) -> Self {
        FolderPatch {
            name: Some(folder.name.clone()),
            color: Some(folder.color),
            visible: Some(folder.is_visible),
            locked: Some(folder.is_locked),
            order: Some(folder.sort_order),
            client_id: folder.correlation_id.clone(),
        }
    }
}

// =============================================================================
// List (Task)
// =============================================================================

/// Completion travels as its integer code.
mod completion_code {
    use super::Completion;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Completion, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(value.code())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Completion, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Completion::from_code(code).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    pub id: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub details: String,
    #[serde(default, with = "completion_code")]
    pub completed: Completion,
    #[serde(default)]
    pub important: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_time: bool,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub role: ShareRole,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ListRecord {
    /// Local row for this record. `folder_id` is the resolved local folder.
    pub fn to_task(&self, local_id: &str, folder_id: Option<String>) -> Task {
        Task {
            id: local_id.to_string(),
            server_id: Some(self.id.clone()),
            folder_id,
            name: self.name.clone(),
            details: self.details.clone(),
            completion: self.completed,
            is_important: self.important,
            is_pinned: self.pinned,
            target_date: self.target_date,
            has_time: self.has_time,
            is_removed: self.removed,
            share_role: self.role,
            correlation_id: self.client_id.clone(),
            created_at: self.updated_at,
            updated_at: self.updated_at,
        }
    }

    /// Export form of a local task (local ids in `id` and `folderId`).
    pub fn from_local(task: &Task) -> Self {
        ListRecord {
            id: task.id.clone(),
            folder_id: task.folder_id.clone(),
            name: task.name.clone(),
            details: task.details.clone(),
            completed: task.completion,
            important: task.is_important,
            pinned: task.is_pinned,
            target_date: task.target_date,
            has_time: task.has_time,
            removed: task.is_removed,
            role: task.share_role,
            updated_at: task.updated_at,
            client_id: None,
        }
    }
}

impl Resource for ListRecord {
    const KIND: ResourceKind = ResourceKind::Task;
    type Patch = ListPatch;

    fn server_id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Completion code (0/1/2).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub important: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_time: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ListPatch {
    /// Full create body for a locally created task.
    pub fn create_from(task: &Task, folder_server_id: Option<&str>) -> Self {
        ListPatch {
            folder_id: folder_server_id.map(str::to_string),
            name: Some(task.name.clone()),
            details: Some(task.details.clone()),
            completed: Some(task.completion.code()),
            important: Some(task.is_important),
            pinned: Some(task.is_pinned),
            target_date: task.target_date,
            has_time: Some(task.has_time),
            removed: Some(task.is_removed),
            client_id: task.correlation_id.clone(),
        }
    }
}

// =============================================================================
// Item
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: String,
    pub list_id: String,
    #[serde(default)]
    pub sequence: i64,
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ItemRecord {
    pub fn to_item(&self, local_id: &str, task_id: &str) -> ChecklistItem {
        ChecklistItem {
            id: local_id.to_string(),
            server_id: Some(self.id.clone()),
            task_id: task_id.to_string(),
            sequence: self.sequence,
            name: self.name.clone(),
            is_completed: self.completed,
            correlation_id: self.client_id.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Export form of a local item (local ids in `id` and `listId`).
    pub fn from_local(item: &ChecklistItem) -> Self {
        ItemRecord {
            id: item.id.clone(),
            list_id: item.task_id.clone(),
            sequence: item.sequence,
            name: item.name.clone(),
            completed: item.is_completed,
            updated_at: item.updated_at,
            client_id: None,
        }
    }
}

impl Resource for ItemRecord {
    const KIND: ResourceKind = ResourceKind::Item;
    type Patch = ItemPatch;

    fn server_id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn parent_server_id(&self) -> Option<&str> {
        Some(&self.list_id)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

// =============================================================================
// Notification
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub list_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub fire_date: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl NotificationRecord {
    pub fn to_notification(&self, local_id: &str, task_id: &str) -> NotificationRequest {
        NotificationRequest {
            id: local_id.to_string(),
            server_id: Some(self.id.clone()),
            task_id: task_id.to_string(),
            kind: self.kind,
            fire_date: self.fire_date,
            correlation_id: self.client_id.clone(),
            updated_at: self.updated_at,
        }
    }
}

impl Resource for NotificationRecord {
    const KIND: ResourceKind = ResourceKind::Notification;
    type Patch = NotificationPatch;

    fn server_id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn parent_server_id(&self) -> Option<&str> {
        Some(&self.list_id)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<NotificationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fire_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

// =============================================================================
// Share
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkRecord {
    pub id: String,
    pub list_id: String,
    pub token: String,
    #[serde(default = "viewer_role")]
    pub role: ShareRole,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub max_uses: Option<i64>,
    #[serde(default)]
    pub use_count: i64,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMemberRecord {
    pub id: String,
    pub list_id: String,
    pub user_id: String,
    #[serde(default = "viewer_role")]
    pub role: ShareRole,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

fn viewer_role() -> ShareRole {
    ShareRole::Viewer
}

/// The `shares` collection mixes links and members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShareRecord {
    Link(ShareLinkRecord),
    Member(ShareMemberRecord),
}

impl ShareRecord {
    pub fn list_id(&self) -> &str {
        match self {
            ShareRecord::Link(link) => &link.list_id,
            ShareRecord::Member(member) => &member.list_id,
        }
    }
}

impl ShareLinkRecord {
    pub fn to_link(&self, local_id: &str, task_id: &str) -> ShareLink {
        ShareLink {
            id: local_id.to_string(),
            server_id: Some(self.id.clone()),
            task_id: task_id.to_string(),
            token: self.token.clone(),
            role: self.role,
            expires_at: self.expires_at,
            is_revoked: self.revoked,
            max_uses: self.max_uses,
            use_count: self.use_count,
            updated_at: self.updated_at,
        }
    }
}

impl ShareMemberRecord {
    pub fn to_member(&self, local_id: &str, task_id: &str) -> ShareMember {
        ShareMember {
            id: local_id.to_string(),
            server_id: Some(self.id.clone()),
            task_id: task_id.to_string(),
            user_id: self.user_id.clone(),
            role: self.role,
            updated_at: self.updated_at,
        }
    }
}

impl Resource for ShareRecord {
    const KIND: ResourceKind = ResourceKind::Share;
    type Patch = SharePatch;

    fn server_id(&self) -> &str {
        match self {
            ShareRecord::Link(link) => &link.id,
            ShareRecord::Member(member) => &member.id,
        }
    }

    fn updated_at(&self) -> DateTime<Utc> {
        match self {
            ShareRecord::Link(link) => link.updated_at,
            ShareRecord::Member(member) => member.updated_at,
        }
    }

    fn parent_server_id(&self) -> Option<&str> {
        Some(self.list_id())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SharePatch {
    #[serde(rename_all = "camelCase")]
    Link {
        list_id: String,
        role: ShareRole,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_uses: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        revoked: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Member {
        list_id: String,
        user_id: String,
        role: ShareRole,
    },
}
