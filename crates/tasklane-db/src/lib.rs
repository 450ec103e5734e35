//! # tasklane-db: Local Store for Tasklane
//!
//! SQLite-backed persistence for every synchronized entity plus the
//! bookkeeping the sync core owns (cursors, tombstones, deferred deltas and
//! the token pair).
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tasklane Data Flow                               │
//! │                                                                         │
//! │  UI collaborator (reads)          ReconciliationEngine (writes)         │
//! │       │                                   │  one transaction per kind   │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   tasklane-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ folder / task  │    │  (embedded)  │  │   │
//! │  │   │               │    │ item / notif.  │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ share / sync   │    │ 001_init.sql │  │   │
//! │  │   │ begin()       │    │ auth           │    │ 002_sync.sql │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Access Styles
//!
//! - Pool-backed repository structs (`db.tasks().list()`) for UI reads and
//!   single-statement local edits.
//! - Free functions taking `&mut SqliteConnection` in each repository module,
//!   so the reconciliation engine can run many of them inside one
//!   transaction (`&mut *tx`).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tasklane_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("tasklane.db")).await?;
//! let tasks = db.tasks().list().await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::auth::AuthTokenRepository;
pub use repository::folder::FolderRepository;
pub use repository::item::ChecklistItemRepository;
pub use repository::notification::NotificationRepository;
pub use repository::share::ShareRepository;
pub use repository::sync_state::{DeferredDelta, SyncStateRepository};
pub use repository::task::TaskRepository;

/// Transaction over the store's pool.
pub type DbTransaction = sqlx::Transaction<'static, sqlx::Sqlite>;
