//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   AuthError     │  │    NetError     │  │     BackupError         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  SessionExpired │  │  Timeout        │  │  Io                     │ │
//! │  │  Offline        │  │  Offline        │  │  Format                 │ │
//! │  │  Timeout        │  │  Unauthorized   │  │  Database               │ │
//! │  │  Server         │  │  DecodeFailure  │  │                         │ │
//! │  └────────┬────────┘  └────────┬────────┘  └────────────┬────────────┘ │
//! │           └────────────────────┼────────────────────────┘              │
//! │                                ▼                                        │
//! │                           SyncError ──► FailureKind (pass reports)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transient failures (timeouts, no connectivity, 5xx) are retried on the
//! next natural trigger, never in a loop within the same pass.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tasklane_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for network calls.
pub type NetResult<T> = Result<T, NetError>;

// =============================================================================
// Auth Error
// =============================================================================

/// Token lifecycle failures.
///
/// `Clone` because one refresh outcome is shared by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The refresh token was rejected or no session exists. The user must
    /// sign in again.
    #[error("Session expired, sign in again")]
    SessionExpired,

    /// The token endpoint could not be reached.
    #[error("Token endpoint unreachable: {0}")]
    Offline(String),

    /// The refresh call exceeded its timeout.
    #[error("Token refresh timed out")]
    Timeout,

    /// The token endpoint answered with an unexpected status.
    #[error("Token endpoint returned status {status}")]
    Server { status: u16 },

    /// The token endpoint answered with an unreadable body.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// The token pair could not be read or written locally.
    #[error("Token storage failed: {0}")]
    Storage(String),
}

impl AuthError {
    /// Returns true if a later attempt may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Offline(_) | AuthError::Timeout => true,
            AuthError::Server { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// =============================================================================
// Net Error
// =============================================================================

/// Failures of one REST call.
#[derive(Debug, Error)]
pub enum NetError {
    /// The call exceeded its timeout.
    #[error("Request timed out")]
    Timeout,

    /// No connectivity.
    #[error("Offline: {0}")]
    Offline(String),

    /// A second 401 after one forced refresh.
    #[error("Unauthorized after token refresh")]
    Unauthorized,

    /// The response body did not match the expected schema.
    #[error("Malformed response: {0}")]
    DecodeFailure(String),

    /// Any other non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Request could not be built or sent.
    #[error("Request failed: {0}")]
    Request(String),

    /// Obtaining a token failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The pass was abandoned while the call was in flight.
    #[error("Request cancelled")]
    Cancelled,
}

impl NetError {
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Timeout | NetError::Offline(_) | NetError::Request(_) => true,
            NetError::Http { status, .. } => *status >= 500 || *status == 429,
            NetError::Auth(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Convert reqwest errors to NetError.
///
/// ## Error Mapping
/// ```text
/// timeout        → NetError::Timeout
/// connect        → NetError::Offline
/// decode / body  → NetError::DecodeFailure
/// status         → NetError::Http
/// other          → NetError::Request
/// ```
impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetError::Timeout
        } else if err.is_connect() {
            NetError::Offline(err.to_string())
        } else if err.is_decode() {
            NetError::DecodeFailure(err.to_string())
        } else if let Some(status) = err.status() {
            NetError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            NetError::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for NetError {
    fn from(err: url::ParseError) -> Self {
        NetError::Request(format!("invalid URL: {err}"))
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::DecodeFailure(err.to_string())
    }
}

// =============================================================================
// Backup Error
// =============================================================================

/// Export/import failures. Fatal for that operation only.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid snapshot file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Database(#[from] DbError),
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Sync error type covering all sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid service URL.
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Net(#[from] NetError),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Local store failure.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// A stored or received record could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Backup(#[from] BackupError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The pass was cancelled.
    #[error("Sync pass cancelled")]
    Cancelled,

    /// The auto-sync loop has already shut down.
    #[error("Auto-sync loop has already shut down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.into())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

/// Stable category of a failure, carried in pass reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SessionExpired,
    Unauthorized,
    Timeout,
    Offline,
    /// 5xx or 429 from the service.
    ServerError,
    /// Any other non-success status.
    Rejected,
    DecodeFailure,
    Storage,
    Io,
    Config,
    Cancelled,
    Internal,
}

impl FailureKind {
    /// Transient failures are retried silently on the next trigger.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::Offline | FailureKind::ServerError
        )
    }
}

impl AuthError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AuthError::SessionExpired => FailureKind::SessionExpired,
            AuthError::Offline(_) => FailureKind::Offline,
            AuthError::Timeout => FailureKind::Timeout,
            AuthError::Server { status } if *status >= 500 || *status == 429 => {
                FailureKind::ServerError
            }
            AuthError::Server { .. } => FailureKind::Rejected,
            AuthError::InvalidResponse(_) => FailureKind::DecodeFailure,
            AuthError::Storage(_) => FailureKind::Storage,
        }
    }
}

impl NetError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            NetError::Timeout => FailureKind::Timeout,
            NetError::Offline(_) | NetError::Request(_) => FailureKind::Offline,
            NetError::Unauthorized => FailureKind::Unauthorized,
            NetError::DecodeFailure(_) => FailureKind::DecodeFailure,
            NetError::Http { status, .. } if *status >= 500 || *status == 429 => {
                FailureKind::ServerError
            }
            NetError::Http { .. } => FailureKind::Rejected,
            NetError::Auth(err) => err.failure_kind(),
            NetError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl SyncError {
    /// Returns true if this error is transient and the pass can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Auth(err) => err.is_retryable(),
            SyncError::Net(err) => err.is_retryable(),
            SyncError::Database(DbError::PoolExhausted) => true,
            _ => false,
        }
    }

    /// Returns true if the user must sign in again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(AuthError::SessionExpired)
                | SyncError::Net(NetError::Auth(AuthError::SessionExpired))
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Auth(err) => err.failure_kind(),
            SyncError::Net(err) => err.failure_kind(),
            SyncError::Database(_) => FailureKind::Storage,
            SyncError::Serialization(_) => FailureKind::DecodeFailure,
            SyncError::Backup(BackupError::Io { .. }) => FailureKind::Io,
            SyncError::Backup(BackupError::Format(_)) => FailureKind::DecodeFailure,
            SyncError::Backup(BackupError::Database(_)) => FailureKind::Storage,
            SyncError::Cancelled | SyncError::ShuttingDown => FailureKind::Cancelled,
            SyncError::Internal(_) => FailureKind::Internal,
            _ => FailureKind::Config,
        }
    }
}
