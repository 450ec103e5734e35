//! # Reconciliation Engine
//!
//! Merges one resource kind's delta into the local store, exactly once and
//! in one transaction.
//!
//! ## Merge Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     apply_delta::<R>(delta, hints)                      │
//! │                                                                         │
//! │  normalise batch ── latest upsert / latest delete per server id         │
//! │       │             (upsert kept only if newer than the delete)         │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │   ├─ deletes: server wrote later? keep : remove (+cascade) → tombstone  │
//! │   ├─ upserts:                                                           │
//! │   │    tombstone ≥ updatedAt? ─────────────► skip (stale retry)         │
//! │   │    server wrote row later? ────────────► skip (out of order)        │
//! │   │    local id = bound │ optimistic(clientId) │ new uuid               │
//! │   │    parent task missing?                                             │
//! │   │      ├─ apply parent from hints, retry                              │
//! │   │      ├─ parent tombstoned ─────────────► drop                       │
//! │   │      └─ otherwise ─────────────────────► deferred_deltas            │
//! │   └─ write row, clear tombstone + parked copy                           │
//! │  COMMIT  (any error rolls the whole batch back)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A record whose `updatedAt` is missing decodes as the Unix epoch. Such
//! timestamps are treated as unknown: they never make an upsert stale.
//!
//! Ordering checks only look at `server_updated_at`, the last server
//! timestamp written to a row. Edits made on the device leave it alone, so
//! they cannot hide a later server delete or update.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tasklane_core::wire::ListRecord;
use tasklane_core::{Delta, ResourceKind, Tombstone};
use tasklane_db::repository::{sync_state, SyncMeta};
use tasklane_db::{Database, DbError, DbResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::merge::{MergeTarget, Resolution};

/// Outcome counts of one reconciliation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub kind: ResourceKind,
    pub upserted: usize,
    pub deleted: usize,
    /// Stale or superseded records left untouched.
    pub skipped: usize,
    /// Children parked until their parent task arrives.
    pub deferred: usize,
    /// Children discarded because their parent is gone for good.
    pub dropped: usize,
}

impl ReconcileReport {
    pub fn new(kind: ResourceKind) -> Self {
        ReconcileReport {
            kind,
            upserted: 0,
            deleted: 0,
            skipped: 0,
            deferred: 0,
            dropped: 0,
        }
    }

    /// Whether the store changed.
    pub fn changed(&self) -> bool {
        self.upserted > 0 || self.deleted > 0
    }
}

enum MergeOutcome {
    Applied,
    Skipped(&'static str),
    MissingParent(String),
}

fn is_known(ts: DateTime<Utc>) -> bool {
    ts != DateTime::<Utc>::default()
}

/// Whether the server already wrote this row with a timestamp after `ts`.
/// Local edits do not count.
fn newer_on_server(meta: &SyncMeta, ts: DateTime<Utc>) -> bool {
    meta.server_updated_at
        .is_some_and(|seen| is_known(seen) && seen > ts)
}

// =============================================================================
// Batch normalisation
// =============================================================================

/// The surviving operations of one batch, keyed by server id.
struct BatchPlan<'a, R> {
    deletes: Vec<&'a Tombstone>,
    upserts: Vec<&'a R>,
    superseded: usize,
}

impl<'a, R: MergeTarget> BatchPlan<'a, R> {
    fn from_delta(delta: &'a Delta<R>) -> Self {
        let mut upserts: BTreeMap<&str, &R> = BTreeMap::new();
        for record in &delta.upserts {
            let keep = upserts
                .get(record.server_id())
                .map_or(true, |seen| record.updated_at() >= seen.updated_at());
            if keep {
                upserts.insert(record.server_id(), record);
            }
        }

        let mut deletes: BTreeMap<&str, &Tombstone> = BTreeMap::new();
        for tomb in &delta.deletes {
            let keep = deletes
                .get(tomb.id.as_str())
                .map_or(true, |seen| tomb.deleted_at >= seen.deleted_at);
            if keep {
                deletes.insert(tomb.id.as_str(), tomb);
            }
        }

        let mut superseded = 0;
        deletes.retain(|id, tomb| match upserts.get(id) {
            Some(record) if record.updated_at() > tomb.deleted_at => {
                superseded += 1;
                false
            }
            Some(_) => {
                upserts.remove(id);
                superseded += 1;
                true
            }
            None => true,
        });

        BatchPlan {
            deletes: deletes.into_values().collect(),
            upserts: upserts.into_values().collect(),
            superseded,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Merges deltas into the local store.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    db: Database,
    warn_after_attempts: u32,
}

impl ReconciliationEngine {
    /// `warn_after_attempts` only controls logging. Parked children are kept
    /// until their parent arrives or is deleted.
    pub fn new(db: Database, warn_after_attempts: u32) -> Self {
        ReconciliationEngine {
            db,
            warn_after_attempts: warn_after_attempts.max(1),
        }
    }

    /// Applies `delta` atomically. `hints` are task records fetched in the
    /// current pass, used to materialise a missing parent.
    pub async fn apply_delta<R: MergeTarget>(
        &self,
        delta: &Delta<R>,
        hints: &[ListRecord],
    ) -> SyncResult<ReconcileReport> {
        let mut report = ReconcileReport::new(R::KIND);
        if delta.is_empty() {
            debug!(kind = %R::KIND, "Empty delta, nothing to reconcile");
            return Ok(report);
        }

        let plan = BatchPlan::from_delta(delta);
        report.skipped += plan.superseded;

        let mut tx = self.db.begin().await?;
        for tomb in &plan.deletes {
            apply_delete::<R>(&mut tx, tomb, &mut report).await?;
        }
        for record in &plan.upserts {
            apply_upsert(&mut tx, *record, hints, &mut report).await?;
        }
        tx.commit().await.map_err(DbError::from)?;

        info!(
            kind = %R::KIND,
            upserted = report.upserted,
            deleted = report.deleted,
            skipped = report.skipped,
            deferred = report.deferred,
            dropped = report.dropped,
            "Reconciled delta"
        );
        Ok(report)
    }

    /// Retries parked children of `R`'s kind.
    ///
    /// A child is discarded only when its parent task has a tombstone.
    /// Failed retries are counted and logged, never fatal.
    pub async fn retry_deferred<R: MergeTarget>(&self) -> SyncResult<ReconcileReport> {
        let mut report = ReconcileReport::new(R::KIND);
        let parked = self.db.sync_state().deferred(R::KIND).await?;
        if parked.is_empty() {
            return Ok(report);
        }

        let mut tx = self.db.begin().await?;
        for row in &parked {
            let record: R = match serde_json::from_str(&row.payload) {
                Ok(record) => record,
                Err(err) => {
                    warn!(kind = %R::KIND, id = %row.id, %err, "Discarding unreadable deferred record");
                    sync_state::discard(&mut tx, &row.id).await?;
                    report.dropped += 1;
                    continue;
                }
            };

            match merge_record(&mut tx, &record).await? {
                MergeOutcome::Applied => {
                    sync_state::discard(&mut tx, &row.id).await?;
                    report.upserted += 1;
                }
                MergeOutcome::Skipped(reason) => {
                    debug!(kind = %R::KIND, server_id = %row.server_id, reason, "Deferred record superseded");
                    sync_state::discard(&mut tx, &row.id).await?;
                    report.skipped += 1;
                }
                MergeOutcome::MissingParent(parent) => {
                    if sync_state::tombstone(&mut tx, ResourceKind::Task, &parent)
                        .await?
                        .is_some()
                    {
                        debug!(kind = %R::KIND, server_id = %row.server_id, parent = %parent, "Parent deleted, dropping deferred record");
                        sync_state::discard(&mut tx, &row.id).await?;
                        report.dropped += 1;
                    } else {
                        let attempts = row.attempts + 1;
                        if attempts >= i64::from(self.warn_after_attempts) {
                            warn!(
                                kind = %R::KIND,
                                server_id = %row.server_id,
                                parent = %parent,
                                attempts,
                                "Deferred record still waiting for its parent"
                            );
                        }
                        let reason = format!("parent task {parent} not present");
                        sync_state::bump_attempts(&mut tx, &row.id, &reason).await?;
                        report.deferred += 1;
                    }
                }
            }
        }
        tx.commit().await.map_err(DbError::from)?;

        info!(
            kind = %R::KIND,
            applied = report.upserted,
            still_deferred = report.deferred,
            dropped = report.dropped,
            "Retried deferred records"
        );
        Ok(report)
    }
}

// =============================================================================
// Per-record steps
// =============================================================================

async fn apply_delete<R: MergeTarget>(
    conn: &mut SqliteConnection,
    tomb: &Tombstone,
    report: &mut ReconcileReport,
) -> DbResult<()> {
    if let Some(bound) = R::find_bound(conn, &tomb.id).await? {
        if newer_on_server(&bound, tomb.deleted_at) {
            debug!(kind = %R::KIND, server_id = %tomb.id, "Row rewritten by the server after delete, kept");
            report.skipped += 1;
            return Ok(());
        }
        R::remove(conn, &tomb.id).await?;
        report.deleted += 1;
    }
    sync_state::record_tombstone(conn, R::KIND, &tomb.id, tomb.deleted_at).await?;
    sync_state::clear_deferred(conn, R::KIND, &tomb.id).await?;
    Ok(())
}

async fn apply_upsert<R: MergeTarget>(
    conn: &mut SqliteConnection,
    record: &R,
    hints: &[ListRecord],
    report: &mut ReconcileReport,
) -> DbResult<()> {
    let mut outcome = merge_record(conn, record).await?;

    if let MergeOutcome::MissingParent(parent) = &outcome {
        if let Some(hint) = hints.iter().find(|h| &h.id == parent) {
            debug!(kind = %R::KIND, parent = %parent, "Applying parent task from current pass");
            merge_record(conn, hint).await?;
            outcome = merge_record(conn, record).await?;
        }
    }

    match outcome {
        MergeOutcome::Applied => {
            sync_state::clear_deferred(conn, R::KIND, record.server_id()).await?;
            report.upserted += 1;
        }
        MergeOutcome::Skipped(reason) => {
            debug!(kind = %R::KIND, server_id = record.server_id(), reason, "Skipped upsert");
            report.skipped += 1;
        }
        MergeOutcome::MissingParent(parent) => {
            if sync_state::tombstone(conn, ResourceKind::Task, &parent)
                .await?
                .is_some()
            {
                debug!(kind = %R::KIND, server_id = record.server_id(), parent = %parent, "Parent deleted, dropping child");
                sync_state::clear_deferred(conn, R::KIND, record.server_id()).await?;
                report.dropped += 1;
            } else {
                warn!(
                    kind = %R::KIND,
                    server_id = record.server_id(),
                    parent = %parent,
                    "Parent task not present, deferring child"
                );
                let payload = serde_json::to_string(record)?;
                let reason = format!("parent task {parent} not present");
                sync_state::defer(conn, R::KIND, record.server_id(), &parent, &payload, &reason)
                    .await?;
                report.deferred += 1;
            }
        }
    }
    Ok(())
}

/// Writes one record if it is not stale. Never consults hints or parks.
async fn merge_record<R: MergeTarget>(
    conn: &mut SqliteConnection,
    record: &R,
) -> DbResult<MergeOutcome> {
    let server_id = record.server_id();
    let updated_at = record.updated_at();

    if let Some(deleted_at) = sync_state::tombstone(conn, R::KIND, server_id).await? {
        if !is_known(updated_at) || deleted_at >= updated_at {
            return Ok(MergeOutcome::Skipped("deleted on server"));
        }
    }

    let bound = R::find_bound(conn, server_id).await?;
    if let Some(meta) = &bound {
        if is_known(updated_at) && newer_on_server(meta, updated_at) {
            return Ok(MergeOutcome::Skipped("older than last server write"));
        }
    }

    let parent = match record.resolve(conn).await? {
        Resolution::Ready(parent) => parent,
        Resolution::MissingParent(parent) => return Ok(MergeOutcome::MissingParent(parent)),
    };

    let local_id = match bound {
        Some(meta) => meta.id,
        None => {
            let adopted = match record.client_id() {
                Some(client_id) => R::find_optimistic(conn, client_id).await?,
                None => None,
            };
            match adopted {
                Some(id) => {
                    debug!(kind = %R::KIND, server_id, local_id = %id, "Adopted optimistic row");
                    id
                }
                None => Uuid::new_v4().to_string(),
            }
        }
    };

    record.write(conn, &local_id, parent.as_deref()).await?;
    sync_state::clear_tombstone(conn, R::KIND, server_id).await?;
    Ok(MergeOutcome::Applied)
}
