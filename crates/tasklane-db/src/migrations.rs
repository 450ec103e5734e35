//! # Database Migrations
//!
//! Embedded SQL migrations for the local store.
//!
//! ```text
//! migrations/sqlite/
//! ├── 001_initial_schema.sql  # folders, tasks and task children
//! ├── 002_sync_state.sql      # cursors, tombstones, deferred deltas, tokens
//! └── 003_server_timestamps.sql  # server_updated_at on every synced table
//! ```
//!
//! Never modify an applied migration; add a new numbered file instead.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!(
        available = MIGRATOR.migrations.len(),
        "Checking for pending migrations"
    );
    MIGRATOR.run(pool).await?;
    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)` for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;
    Ok((total, applied as usize))
}
