//! # Domain Types
//!
//! Local entities held in the store and handed to the UI collaborator.
//!
//! ## Entity Graph
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐        ┌─────────────────┐                         │
//! │  │     Folder      │ 0..1   │      Task       │   ("list" on the wire)  │
//! │  │  ─────────────  │◄───────│  ─────────────  │                         │
//! │  │  id / server_id │        │  id / server_id │                         │
//! │  │  color (RGBA)   │        │  completion     │                         │
//! │  │  sort_order     │        │  removed (soft) │                         │
//! │  └─────────────────┘        └───────┬─────────┘                         │
//! │                                     │ exactly one parent               │
//! │            ┌────────────────┬───────┴────────┬─────────────────┐       │
//! │            ▼                ▼                ▼                 ▼       │
//! │   ┌───────────────┐ ┌───────────────┐ ┌─────────────┐ ┌─────────────┐  │
//! │   │ ChecklistItem │ │ Notification  │ │  ShareLink  │ │ ShareMember │  │
//! │   │  sequence     │ │  kind, fire   │ │  expiry     │ │  user_id    │  │
//! │   └───────────────┘ └───────────────┘ └─────────────┘ └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 generated locally, never changes, used for local relations
//! - `server_id`: assigned by the service, absent until the first sync, then
//!   immutable and the join key for every later reconciliation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Resource Kind
// =============================================================================

/// The five remote resource kinds, in the order a sync pass visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ResourceKind {
    Folder,
    Task,
    Item,
    Notification,
    Share,
}

impl ResourceKind {
    /// Dependency order: parents before children.
    pub const SYNC_ORDER: [ResourceKind; 5] = [
        ResourceKind::Folder,
        ResourceKind::Task,
        ResourceKind::Item,
        ResourceKind::Notification,
        ResourceKind::Share,
    ];

    /// Stable name used in the store (cursor and tombstone keys).
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Folder => "folder",
            ResourceKind::Task => "task",
            ResourceKind::Item => "item",
            ResourceKind::Notification => "notification",
            ResourceKind::Share => "share",
        }
    }

    /// REST collection segment for this kind.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResourceKind::Folder => "folders",
            ResourceKind::Task => "lists",
            ResourceKind::Item => "items",
            ResourceKind::Notification => "notifications",
            ResourceKind::Share => "shares",
        }
    }

    /// Whether rows of this kind hang off a Task.
    pub fn is_task_child(&self) -> bool {
        matches!(
            self,
            ResourceKind::Item | ResourceKind::Notification | ResourceKind::Share
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "folder" | "folders" => Ok(ResourceKind::Folder),
            "task" | "list" | "lists" | "tasks" => Ok(ResourceKind::Task),
            "item" | "items" => Ok(ResourceKind::Item),
            "notification" | "notifications" => Ok(ResourceKind::Notification),
            "share" | "shares" => Ok(ResourceKind::Share),
            other => Err(CoreError::UnknownResourceKind(other.to_string())),
        }
    }
}

// =============================================================================
// Color
// =============================================================================

/// A folder color packed as `0xRRGGBBAA`.
///
/// Serialized as `"#RRGGBBAA"`; parsing also accepts `"#RRGGBB"` (opaque).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct Rgba(pub u32);

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba(((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32)
    }

    pub fn alpha(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub fn to_hex(&self) -> String {
        format!("#{:08X}", self.0)
    }
}

impl FromStr for Rgba {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidColor(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        match hex.len() {
            6 => u32::from_str_radix(hex, 16)
                .map(|rgb| Rgba((rgb << 8) | 0xff))
                .map_err(|_| invalid()),
            8 => u32::from_str_radix(hex, 16).map(Rgba).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Rgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Tri-state completion of a task.
///
/// ## Wire Codes
/// ```text
/// 0 = None       (task is not a checkable to-do)
/// 1 = Unchecked
/// 2 = Checked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Completion {
    #[default]
    None,
    Unchecked,
    Checked,
}

impl Completion {
    pub fn code(&self) -> u8 {
        match self {
            Completion::None => 0,
            Completion::Unchecked => 1,
            Completion::Checked => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, CoreError> {
        match code {
            0 => Ok(Completion::None),
            1 => Ok(Completion::Unchecked),
            2 => Ok(Completion::Checked),
            other => Err(CoreError::InvalidCode {
                field: "completion",
                code: other,
            }),
        }
    }
}

/// Role granted on a shared task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ShareRole {
    #[default]
    Owner,
    Editor,
    Viewer,
}

/// When a reminder fires relative to the task's target date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum NotificationKind {
    AtTime,
    FiveMinutesBefore,
    FifteenMinutesBefore,
    ThirtyMinutesBefore,
    OneHourBefore,
    OneDayBefore,
}

impl NotificationKind {
    /// Lead time before the target date.
    pub fn lead_time(&self) -> Duration {
        match self {
            NotificationKind::AtTime => Duration::zero(),
            NotificationKind::FiveMinutesBefore => Duration::minutes(5),
            NotificationKind::FifteenMinutesBefore => Duration::minutes(15),
            NotificationKind::ThirtyMinutesBefore => Duration::minutes(30),
            NotificationKind::OneHourBefore => Duration::hours(1),
            NotificationKind::OneDayBefore => Duration::days(1),
        }
    }

    /// Fire date for a reminder of this kind on `target`.
    pub fn fire_date_for(&self, target: DateTime<Utc>) -> DateTime<Utc> {
        target - self.lead_time()
    }
}

// =============================================================================
// Folder
// =============================================================================

/// A user or system folder grouping tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Folder {
    /// Local identifier (UUID v4).
    pub id: String,

    /// Server identifier, absent until first sync.
    pub server_id: Option<String>,

    pub name: String,

    #[ts(type = "string")]
    pub color: Rgba,

    pub is_visible: bool,

    pub is_locked: bool,

    /// Built-in folders cannot be deleted locally.
    pub is_system: bool,

    pub is_shared: bool,

    /// Dense display rank, 0-based.
    pub sort_order: i64,

    /// Client-generated token echoed by the service as `clientId`.
    pub correlation_id: Option<String>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a folder locally.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewFolder {
    pub name: String,
    #[ts(type = "string")]
    pub color: Rgba,
    pub is_visible: bool,
}

// =============================================================================
// Task
// =============================================================================

/// A task (called a "list" by the REST service).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Task {
    /// Local identifier (UUID v4).
    pub id: String,

    /// Server identifier. Once set it never changes.
    pub server_id: Option<String>,

    /// Owning folder (local id).
    pub folder_id: Option<String>,

    pub name: String,

    pub details: String,

    pub completion: Completion,

    pub is_important: bool,

    pub is_pinned: bool,

    #[ts(as = "Option<String>")]
    pub target_date: Option<DateTime<Utc>>,

    /// Whether `target_date` carries a time of day.
    pub has_time: bool,

    /// Soft-delete flag (trash).
    pub is_removed: bool,

    pub share_role: ShareRole,

    pub correlation_id: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Returns true once the service has assigned an identifier.
    pub fn is_synced(&self) -> bool {
        self.server_id.is_some()
    }
}

/// Input for creating a task locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewTask {
    pub folder_id: Option<String>,
    pub name: String,
    pub details: String,
    pub completion: Completion,
    pub is_important: bool,
    pub is_pinned: bool,
    #[ts(as = "Option<String>")]
    pub target_date: Option<DateTime<Utc>>,
    pub has_time: bool,
}

// =============================================================================
// Task Children
// =============================================================================

/// One line of a task's checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ChecklistItem {
    pub id: String,
    pub server_id: Option<String>,
    /// Parent task (local id).
    pub task_id: String,
    /// Display order within the task.
    pub sequence: i64,
    pub name: String,
    pub is_completed: bool,
    pub correlation_id: Option<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Input for adding a checklist item locally.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewChecklistItem {
    pub task_id: String,
    pub name: String,
}

/// A reminder attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct NotificationRequest {
    pub id: String,
    pub server_id: Option<String>,
    pub task_id: String,
    pub kind: NotificationKind,
    #[ts(as = "String")]
    pub fire_date: DateTime<Utc>,
    pub correlation_id: Option<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// An invitation link for a shared task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ShareLink {
    pub id: String,
    pub server_id: Option<String>,
    pub task_id: String,
    pub token: String,
    pub role: ShareRole,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub max_uses: Option<i64>,
    pub use_count: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl ShareLink {
    /// A link can still be redeemed when it is not revoked, expired or used up.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked
            && self.expires_at.map_or(true, |at| at > now)
            && self.max_uses.map_or(true, |max| self.use_count < max)
    }
}

/// A user with access to a shared task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ShareMember {
    pub id: String,
    pub server_id: Option<String>,
    pub task_id: String,
    pub user_id: String,
    pub role: ShareRole,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Session
// =============================================================================

/// Access/refresh token pair of an authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// True when the access token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

// Tokens never reach logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
