//! # tasklane-core: Pure Domain Types for Tasklane
//!
//! Everything the store and the sync engine agree on, with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tasklane Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Mobile UI (external collaborator)               │   │
//! │  │   triggerSync ── exportSnapshot ── importSnapshot ── changes    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tasklane-sync (sync engine)                     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ tasklane-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   wire    │  │   error   │  │ validation│  │   │
//! │  │   │  Folder   │  │  Delta<R> │  │ CoreError │  │   names   │  │   │
//! │  │   │  Task ... │  │  Snapshot │  │           │  │  sequence │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  tasklane-db (local store)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Local entities (Folder, Task, ChecklistItem, ...)
//! - [`wire`] - JSON records exchanged with the REST service
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation for locally created rows

pub mod error;
pub mod types;
pub mod validation;
pub mod wire;

pub use error::{CoreError, ValidationError};
pub use types::*;
pub use wire::{Delta, Resource, Snapshot, Tombstone};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of a task name.
pub const MAX_TASK_NAME_LEN: usize = 500;

/// Maximum length of a folder name.
pub const MAX_FOLDER_NAME_LEN: usize = 100;

/// Maximum length of free-text task details.
pub const MAX_DETAILS_LEN: usize = 10_000;

/// Maximum checklist items a single task may hold.
pub const MAX_CHECKLIST_ITEMS: usize = 200;
