//! # Repository Module
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  UI collaborator                     ReconciliationEngine               │
//! │       │ db.tasks().list()                 │ task::upsert_synced(&mut tx) │
//! │       ▼                                   ▼                             │
//! │  TaskRepository (pool)            free fns (&mut SqliteConnection)      │
//! │       │                                   │                             │
//! │       └──────────────┬────────────────────┘                             │
//! │                      ▼                                                  │
//! │                 SQLite Database                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every entity module exposes the same connection-level vocabulary:
//! `find_sync_meta`, `find_unsynced_by_correlation`, `upsert_synced`,
//! `delete_by_server_id`. Only `upsert_synced` writes `server_updated_at`;
//! rows created on the device go through `insert_local`.

pub mod auth;
pub mod folder;
pub mod item;
pub mod notification;
pub mod share;
pub mod sync_state;
pub mod task;

use chrono::{DateTime, Utc};

/// Local id of a row bound to a server id, with the `updatedAt` of the last
/// server record written to it. Local edits never change
/// `server_updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SyncMeta {
    pub id: String,
    pub server_updated_at: Option<DateTime<Utc>>,
}
