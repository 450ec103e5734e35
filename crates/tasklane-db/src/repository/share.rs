//! # Share Repository
//!
//! Share links and share members arrive through the same `shares`
//! collection but live in two tables. Server ids are unique across both.

use sqlx::{SqliteConnection, SqlitePool};

use tasklane_core::{ShareLink, ShareMember};

use super::SyncMeta;
use crate::error::DbResult;

const LINK_COLUMNS: &str = "id, server_id, task_id, token, role, expires_at, is_revoked, \
     max_uses, use_count, updated_at";
const MEMBER_COLUMNS: &str = "id, server_id, task_id, user_id, role, updated_at";

/// Looks up a share of either flavour by server id.
pub async fn find_sync_meta(
    conn: &mut SqliteConnection,
    server_id: &str,
) -> DbResult<Option<SyncMeta>> {
    let meta = sqlx::query_as::<_, SyncMeta>(
        "SELECT id, server_updated_at FROM share_links WHERE server_id = ?1 \
         UNION ALL \
         SELECT id, server_updated_at FROM share_members WHERE server_id = ?1 \
         LIMIT 1",
    )
    .bind(server_id)
    .fetch_optional(conn)
    .await?;
    Ok(meta)
}

pub async fn upsert_link(conn: &mut SqliteConnection, link: &ShareLink) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO share_links ({LINK_COLUMNS}, server_updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(id) DO UPDATE SET \
            server_id = excluded.server_id, \
            task_id = excluded.task_id, \
            token = excluded.token, \
            role = excluded.role, \
            expires_at = excluded.expires_at, \
            is_revoked = excluded.is_revoked, \
            max_uses = excluded.max_uses, \
            use_count = excluded.use_count, \
            updated_at = excluded.updated_at, \
            server_updated_at = excluded.server_updated_at"
    ))
    .bind(&link.id)
    .bind(&link.server_id)
    .bind(&link.task_id)
    .bind(&link.token)
    .bind(link.role)
    .bind(link.expires_at)
    .bind(link.is_revoked)
    .bind(link.max_uses)
    .bind(link.use_count)
    .bind(link.updated_at)
    .bind(link.server_id.as_ref().map(|_| link.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn upsert_member(conn: &mut SqliteConnection, member: &ShareMember) -> DbResult<()> {
    sqlx::query(&format!(
        "INSERT INTO share_members ({MEMBER_COLUMNS}, server_updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(id) DO UPDATE SET \
            server_id = excluded.server_id, \
            task_id = excluded.task_id, \
            user_id = excluded.user_id, \
            role = excluded.role, \
            updated_at = excluded.updated_at, \
            server_updated_at = excluded.server_updated_at"
    ))
    .bind(&member.id)
    .bind(&member.server_id)
    .bind(&member.task_id)
    .bind(&member.user_id)
    .bind(member.role)
    .bind(member.updated_at)
    .bind(member.server_id.as_ref().map(|_| member.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Removes the link or member bound to `server_id`.
pub async fn delete_by_server_id(conn: &mut SqliteConnection, server_id: &str) -> DbResult<bool> {
    let links = delete_link_by_server_id(&mut *conn, server_id).await?;
    let members = delete_member_by_server_id(&mut *conn, server_id).await?;
    Ok(links || members)
}

/// Removes only a link row. Used when a share id turns into a member.
pub async fn delete_link_by_server_id(
    conn: &mut SqliteConnection,
    server_id: &str,
) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM share_links WHERE server_id = ?1")
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Removes only a member row. Used when a share id turns into a link.
pub async fn delete_member_by_server_id(
    conn: &mut SqliteConnection,
    server_id: &str,
) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM share_members WHERE server_id = ?1")
        .bind(server_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Repository for share links and members.
#[derive(Debug, Clone)]
pub struct ShareRepository {
    pool: SqlitePool,
}

impl ShareRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShareRepository { pool }
    }

    pub async fn links_for_task(&self, task_id: &str) -> DbResult<Vec<ShareLink>> {
        let rows = sqlx::query_as::<_, ShareLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM share_links WHERE task_id = ?1 ORDER BY updated_at ASC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn members_for_task(&self, task_id: &str) -> DbResult<Vec<ShareMember>> {
        let rows = sqlx::query_as::<_, ShareMember>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM share_members WHERE task_id = ?1 ORDER BY user_id ASC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_link_by_server_id(&self, server_id: &str) -> DbResult<Option<ShareLink>> {
        let row = sqlx::query_as::<_, ShareLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM share_links WHERE server_id = ?1"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Total of links and members.
    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM share_links) + (SELECT COUNT(*) FROM share_members)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
