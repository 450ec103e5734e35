//! # Error Types
//!
//! Domain-specific error types for tasklane-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tasklane-core errors (this file)                                      │
//! │  ├── CoreError        - Domain rule violations, bad wire values        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tasklane-db errors                                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tasklane-sync errors                                                  │
//! │  └── AuthError / NetError / BackupError / SyncError                    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → UI notice   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations and malformed values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task cannot be found locally.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Folder cannot be found locally.
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// Built-in folders cannot be deleted by the user.
    ///
    /// ## When This Occurs
    /// - `delete_local` on a folder with `is_system = true`
    #[error("Folder {0} is a system folder and cannot be deleted")]
    SystemFolder(String),

    /// A color string was not `#RRGGBB` or `#RRGGBBAA`.
    #[error("Invalid color '{0}': expected #RRGGBB or #RRGGBBAA")]
    InvalidColor(String),

    /// A numeric wire code did not map to a known enum value.
    #[error("Invalid {field} code: {code}")]
    InvalidCode { field: &'static str, code: i64 },

    /// Unknown resource kind name.
    #[error("Unknown resource kind: {0}")]
    UnknownResourceKind(String),

    /// Validation failed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors for locally created rows.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is empty.
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// Field exceeds its maximum length.
    #[error("{field} exceeds {max} characters (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Value is below its minimum.
    #[error("{field} must be at least {min} (got {actual})")]
    BelowMinimum {
        field: &'static str,
        min: i64,
        actual: i64,
    },

    /// Collection is full.
    #[error("{field} cannot hold more than {max} entries")]
    LimitReached { field: &'static str, max: usize },
}
