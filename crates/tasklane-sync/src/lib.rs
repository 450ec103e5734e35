//! # tasklane-sync: Offline-First Sync Core for Tasklane
//!
//! Keeps the local store in step with the Tasklane service: it refreshes
//! the session, pulls per-kind deltas, reconciles them into SQLite and tells
//! the UI what changed.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Core Architecture                           │
//! │                                                                         │
//! │  UI triggers (manual, pull-to-refresh, foreground, login)   AutoSync    │
//! │         │                                                      │        │
//! │         └──────────────────────┬───────────────────────────────┘        │
//! │                                ▼                                        │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncOrchestrator (one pass at a time)            │  │
//! │  └───────┬────────────────────┬──────────────────────┬──────────────┘  │
//! │          ▼                    ▼                      ▼                  │
//! │  ┌────────────────┐  ┌─────────────────────┐  ┌──────────────────────┐ │
//! │  │ AccessToken    │  │ ResourceSyncClient  │  │ ReconciliationEngine │ │
//! │  │ Manager        │  │ SnapshotClient      │  │                      │ │
//! │  │                │  │                     │  │ one tx per kind      │ │
//! │  │ single-flight  │◄─│ ApiClient (reqwest) │  │ tombstones, deferred │ │
//! │  │ refresh        │  │ 401 → refresh+retry │  │ children, cascade    │ │
//! │  └────────────────┘  └─────────────────────┘  └──────────────────────┘ │
//! │                                                                         │
//! │  OUTPUT TO THE UI:                                                      │
//! │  • watch channel  - SyncState (Idle, Fetching(kind), ...)               │
//! │  • broadcast      - StoreChanged, PassFinished, ReauthenticationRequired│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`auth`] - Token refresh and the access token manager
//! - [`token_store`] - Where the token pair lives
//! - [`http`] - Authenticated JSON client
//! - [`resource`] - Per-kind delta and push calls
//! - [`snapshot`] - Server snapshot, local export and import
//! - [`merge`] - How each wire record lands in the store
//! - [`reconcile`] - Delta application
//! - [`orchestrator`] - Sync passes and reports
//! - [`events`] - State and change notifications
//! - [`scheduler`] - Background auto-sync
//! - [`config`] / [`error`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tasklane_sync::{SyncConfig, SyncOrchestratorBuilder, SyncTrigger};
//! use tasklane_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let sync = SyncOrchestratorBuilder::new(config)
//!     .with_database(db)
//!     .build()?;
//!
//! let report = sync.trigger_sync(SyncTrigger::PullToRefresh).await;
//! if let Some(notice) = report.notice() {
//!     show(notice);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod merge;
pub mod orchestrator;
pub mod reconcile;
pub mod resource;
pub mod scheduler;
pub mod snapshot;
pub mod token_store;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{AccessTokenManager, HttpTokenRefresher, TokenRefresher};
pub use config::{SyncConfig, SyncSettings};
pub use error::{AuthError, BackupError, FailureKind, NetError, SyncError, SyncResult};
pub use events::{StoreChange, SyncEvent, SyncState};
pub use orchestrator::{
    PassFailure, PassOutcome, PassReport, SyncOrchestrator, SyncOrchestratorBuilder, SyncTrigger,
    UserNotice,
};
pub use reconcile::{ReconcileReport, ReconciliationEngine};
pub use resource::ResourceSyncClient;
pub use scheduler::{AutoSync, AutoSyncHandle, Schedule};
pub use snapshot::{ImportSummary, SnapshotClient};
pub use token_store::{MemoryTokenStore, SqliteTokenStore, TokenStore};
