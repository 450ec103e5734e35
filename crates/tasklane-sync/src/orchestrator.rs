//! # Sync Orchestrator
//!
//! Sequences a sync pass and reports its outcome upward.
//!
//! ## Pass Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncOrchestrator                                 │
//! │                                                                         │
//! │  trigger_sync(trigger) ──► pass in flight? ──yes──► join shared result  │
//! │                                  │ no                                   │
//! │                                  ▼                                      │
//! │                       tokio::spawn(run_pass)                            │
//! │                                  │                                      │
//! │   TokenCheck ── AccessTokenManager::get_valid_access_token              │
//! │        │            └─ SessionExpired ──► ReauthenticationRequired      │
//! │        ▼                                                                │
//! │   no cursors? ──yes──► GET /sync/snapshot ──► reconcile every kind      │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │   for kind in [Folder, Task, Item, Notification, Share]:                │
//! │        retry deferred children                                          │
//! │        Fetching(kind)     ── ResourceSyncClient::fetch_delta(cursor)    │
//! │        Reconciling(kind)  ── ReconciliationEngine::apply_delta          │
//! │        save cursor        ── only after the kind's commit               │
//! │        (a failure is recorded and the next kind still runs)             │
//! │        ▼                                                                │
//! │   PassReport { succeeded, failed, outcome } ──► every waiter + events   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pass runs in its own task, so dropping a waiter never abandons it.
//! `cancel_current_pass` stops further network calls; transactions already
//! committed stay, and the cursors make the rest resumable.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tasklane_core::wire::{FolderRecord, ItemRecord, ListRecord, NotificationRecord, ShareRecord};
use tasklane_core::{Delta, ResourceKind, Snapshot};
use tasklane_db::Database;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AccessTokenManager, HttpTokenRefresher, TokenRefresher};
use crate::config::{SyncConfig, SyncSettings};
use crate::error::{FailureKind, NetError, SyncError, SyncResult};
use crate::events::{EventBus, StoreChange, SyncEvent, SyncState};
use crate::http::{cancellable, ApiClient};
use crate::merge::MergeTarget;
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::resource::ResourceSyncClient;
use crate::snapshot::{ImportSummary, SnapshotClient};
use crate::token_store::{SqliteTokenStore, TokenStore};

// =============================================================================
// Reports
// =============================================================================

/// What asked for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    PullToRefresh,
    AppForeground,
    Scheduled,
    Login,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Succeeded,
    PartiallyFailed,
    Failed,
    Cancelled,
    ReauthenticationRequired,
}

/// One failed step of a pass. `kind` is `None` for steps that are not tied
/// to a resource kind (token check, snapshot fetch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassFailure {
    pub kind: Option<ResourceKind>,
    pub failure: FailureKind,
    pub message: String,
}

impl PassFailure {
    fn new(kind: Option<ResourceKind>, err: &SyncError) -> Self {
        PassFailure {
            kind,
            failure: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

/// What the user should see after a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    /// The session is gone; prompt for sign-in.
    Reauthenticate,
    /// A non-blocking message the user may dismiss.
    Dismissible(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: u64,
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<ResourceKind>,
    pub failed: Vec<PassFailure>,
    pub outcome: PassOutcome,
}

impl PassReport {
    fn internal(pass_id: u64, trigger: SyncTrigger, started_at: DateTime<Utc>, message: String) -> Self {
        PassReport {
            pass_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            succeeded: Vec::new(),
            failed: vec![PassFailure {
                kind: None,
                failure: FailureKind::Internal,
                message,
            }],
            outcome: PassOutcome::Failed,
        }
    }

    /// Kinds that failed in this pass.
    pub fn failed_kinds(&self) -> Vec<ResourceKind> {
        self.failed.iter().filter_map(|f| f.kind).collect()
    }

    /// True when every failure will likely clear up on its own.
    pub fn only_transient_failures(&self) -> bool {
        !self.failed.is_empty() && self.failed.iter().all(|f| f.failure.is_transient())
    }

    /// Transient failures stay invisible; session expiry asks for sign-in;
    /// anything else becomes a dismissible notice.
    pub fn notice(&self) -> Option<UserNotice> {
        match self.outcome {
            PassOutcome::Succeeded | PassOutcome::Cancelled => None,
            PassOutcome::ReauthenticationRequired => Some(UserNotice::Reauthenticate),
            PassOutcome::PartiallyFailed | PassOutcome::Failed => self
                .failed
                .iter()
                .find(|f| !f.failure.is_transient())
                .map(|f| {
                    let scope = f.kind.map_or("sync".to_string(), |k| k.to_string());
                    UserNotice::Dismissible(format!("Could not sync {scope}: {}", f.message))
                }),
        }
    }
}

/// Accumulates step results while a pass runs.
struct PassProgress {
    succeeded: Vec<ResourceKind>,
    failed: Vec<PassFailure>,
    cancelled: bool,
    reauthenticate: bool,
}

impl PassProgress {
    fn new() -> Self {
        PassProgress {
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
            reauthenticate: false,
        }
    }

    /// Records a failed step. Returns true when the pass must stop.
    fn fail(&mut self, kind: Option<ResourceKind>, err: &SyncError) -> bool {
        if err.requires_reauthentication() {
            warn!(kind = ?kind, "Session expired during sync pass");
            self.reauthenticate = true;
            return true;
        }
        if err.failure_kind() == FailureKind::Cancelled {
            info!(kind = ?kind, "Sync pass cancelled");
            self.cancelled = true;
            return true;
        }
        warn!(kind = ?kind, error = %err, retryable = err.is_retryable(), "Sync step failed");
        self.failed.push(PassFailure::new(kind, err));
        false
    }

    fn outcome(&self) -> PassOutcome {
        if self.reauthenticate {
            PassOutcome::ReauthenticationRequired
        } else if self.cancelled {
            PassOutcome::Cancelled
        } else if self.failed.is_empty() {
            PassOutcome::Succeeded
        } else if self.succeeded.is_empty() {
            PassOutcome::Failed
        } else {
            PassOutcome::PartiallyFailed
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

type PassFuture = Shared<BoxFuture<'static, PassReport>>;

struct InflightPass {
    id: u64,
    cancel: CancellationToken,
    result: PassFuture,
}

struct ResourceClients {
    folders: ResourceSyncClient<FolderRecord>,
    lists: ResourceSyncClient<ListRecord>,
    items: ResourceSyncClient<ItemRecord>,
    notifications: ResourceSyncClient<NotificationRecord>,
    shares: ResourceSyncClient<ShareRecord>,
}

struct Inner {
    db: Database,
    tokens: AccessTokenManager,
    engine: ReconciliationEngine,
    clients: ResourceClients,
    snapshots: SnapshotClient,
    settings: SyncSettings,
    events: EventBus,
    current: Mutex<Option<InflightPass>>,
    pass_counter: AtomicU64,
}

/// Entry point for UI collaborators. Cheap to clone.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.inner.events.current_state())
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Runs a pass, or joins the one already running.
    pub async fn trigger_sync(&self, trigger: SyncTrigger) -> PassReport {
        let result = {
            let mut current = self.inner.current.lock().await;
            match current.as_ref() {
                Some(pass) => {
                    info!(pass_id = pass.id, ?trigger, "Sync pass already running, joining it");
                    pass.result.clone()
                }
                None => {
                    let pass = self.start_pass(trigger);
                    let result = pass.result.clone();
                    *current = Some(pass);
                    result
                }
            }
        };
        result.await
    }

    fn start_pass(&self, trigger: SyncTrigger) -> InflightPass {
        let id = self.inner.pass_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let started_at = Utc::now();

        let handle = tokio::spawn(run_pass(
            Arc::clone(&self.inner),
            id,
            trigger,
            cancel.clone(),
        ));
        let inner = Arc::clone(&self.inner);
        let result = async move {
            match handle.await {
                Ok(report) => report,
                Err(err) => {
                    error!(pass_id = id, %err, "Sync pass task failed");
                    finish_pass(&inner, id).await;
                    inner.events.set_state(SyncState::Idle);
                    PassReport::internal(id, trigger, started_at, err.to_string())
                }
            }
        }
        .boxed()
        .shared();

        InflightPass { id, cancel, result }
    }

    /// Cancels the running pass. Returns false when none is running.
    pub async fn cancel_current_pass(&self) -> bool {
        match self.inner.current.lock().await.as_ref() {
            Some(pass) => {
                info!(pass_id = pass.id, "Cancelling sync pass");
                pass.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.current.lock().await.is_some()
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.inner.events.state()
    }

    pub fn current_state(&self) -> SyncState {
        self.inner.events.current_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Change notifications as a stream.
    pub fn events(&self) -> impl Stream<Item = SyncEvent> + Send + 'static {
        self.inner.events.stream()
    }

    pub fn tokens(&self) -> &AccessTokenManager {
        &self.inner.tokens
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Writes the local store to a backup file.
    pub async fn export_snapshot(&self, path: &Path) -> SyncResult<PathBuf> {
        Ok(self.inner.snapshots.export_local(path).await?)
    }

    /// Adds the contents of a backup file as local-only rows.
    pub async fn import_snapshot(&self, path: &Path) -> SyncResult<ImportSummary> {
        let summary = self.inner.snapshots.import_local(path).await?;
        self.inner
            .events
            .publish(SyncEvent::StoreChanged(StoreChange::Imported {
                tasks: summary.tasks,
                items: summary.items,
            }));
        Ok(summary)
    }

    /// Permanently deletes every removed task.
    pub async fn purge_removed(&self) -> SyncResult<u64> {
        let purged = self.inner.db.tasks().purge_removed().await?;
        if purged > 0 {
            self.inner
                .events
                .publish(SyncEvent::StoreChanged(StoreChange::Purged { tasks: purged }));
        }
        Ok(purged)
    }
}

/// Clears the in-flight slot if it still belongs to pass `id`.
async fn finish_pass(inner: &Inner, id: u64) {
    let mut current = inner.current.lock().await;
    if current.as_ref().map(|pass| pass.id) == Some(id) {
        *current = None;
    }
}

// =============================================================================
// Pass
// =============================================================================

async fn run_pass(
    inner: Arc<Inner>,
    id: u64,
    trigger: SyncTrigger,
    cancel: CancellationToken,
) -> PassReport {
    let started_at = Utc::now();
    info!(pass_id = id, ?trigger, "Sync pass started");

    let mut progress = PassProgress::new();
    inner.events.set_state(SyncState::TokenCheck);
    let token = cancellable(&cancel, inner.tokens.get_valid_access_token())
        .await
        .and_then(|token| token.map_err(NetError::from));

    match token {
        Err(err) => {
            progress.fail(None, &SyncError::from(err));
        }
        Ok(_) => match inner.db.sync_state().load_cursors().await {
            Err(err) => {
                progress.fail(None, &SyncError::from(err));
            }
            Ok(cursors) if cursors.is_empty() && inner.settings.bootstrap_with_snapshot => {
                bootstrap(&inner, &cancel, &mut progress).await;
            }
            Ok(_) => incremental(&inner, &cancel, &mut progress).await,
        },
    }

    let outcome = progress.outcome();
    if outcome == PassOutcome::Succeeded {
        if let Err(err) = inner
            .db
            .sync_state()
            .prune_tombstones(inner.settings.tombstone_retention_days)
            .await
        {
            warn!(%err, "Failed to prune tombstones");
        }
    }

    let report = PassReport {
        pass_id: id,
        trigger,
        started_at,
        finished_at: Utc::now(),
        succeeded: progress.succeeded,
        failed: progress.failed,
        outcome,
    };

    match outcome {
        PassOutcome::ReauthenticationRequired => {
            inner.events.set_state(SyncState::Failed {
                reason: "session expired".into(),
            });
            inner.events.publish(SyncEvent::ReauthenticationRequired);
        }
        PassOutcome::Failed => {
            let reason = report
                .failed
                .first()
                .map_or_else(|| "sync failed".to_string(), |f| f.message.clone());
            inner.events.set_state(SyncState::Failed { reason });
        }
        _ => {}
    }

    finish_pass(&inner, id).await;
    inner.events.set_state(SyncState::Idle);
    info!(
        pass_id = id,
        outcome = ?report.outcome,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Sync pass finished"
    );
    inner.events.publish(SyncEvent::PassFinished(report.clone()));
    report
}

async fn incremental(inner: &Inner, cancel: &CancellationToken, progress: &mut PassProgress) {
    let mut hints: Vec<ListRecord> = Vec::new();

    for kind in ResourceKind::SYNC_ORDER {
        if cancel.is_cancelled() {
            progress.cancelled = true;
            break;
        }

        let result = match kind {
            ResourceKind::Folder => sync_kind(inner, &inner.clients.folders, &[], cancel)
                .await
                .map(|(report, _)| report),
            ResourceKind::Task => sync_kind(inner, &inner.clients.lists, &[], cancel)
                .await
                .map(|(report, delta)| {
                    hints = delta.upserts;
                    report
                }),
            ResourceKind::Item => sync_kind(inner, &inner.clients.items, &hints, cancel)
                .await
                .map(|(report, _)| report),
            ResourceKind::Notification => {
                sync_kind(inner, &inner.clients.notifications, &hints, cancel)
                    .await
                    .map(|(report, _)| report)
            }
            ResourceKind::Share => sync_kind(inner, &inner.clients.shares, &hints, cancel)
                .await
                .map(|(report, _)| report),
        };

        match result {
            Ok(report) => {
                publish_reconciled(inner, &report);
                progress.succeeded.push(kind);
            }
            Err(err) => {
                if progress.fail(Some(kind), &err) {
                    break;
                }
            }
        }
    }
}

/// One kind's incremental step. Returns the fetched delta so task records
/// can serve as parent hints for the children that follow.
async fn sync_kind<R: MergeTarget>(
    inner: &Inner,
    client: &ResourceSyncClient<R>,
    hints: &[ListRecord],
    cancel: &CancellationToken,
) -> SyncResult<(ReconcileReport, Delta<R>)> {
    let kind = R::KIND;

    let retried = inner.engine.retry_deferred::<R>().await?;

    inner.events.set_state(SyncState::Fetching(kind));
    let since = inner.db.sync_state().get_cursor(kind).await?;
    let delta = client.fetch_delta(since.as_deref(), cancel).await?;

    inner.events.set_state(SyncState::Reconciling(kind));
    let mut report = inner.engine.apply_delta(&delta, hints).await?;
    report.upserted += retried.upserted;
    report.dropped += retried.dropped;

    match delta.now.as_deref() {
        Some(cursor) => inner.db.sync_state().save_cursor(kind, cursor).await?,
        None => debug!(kind = %kind, "Delta carried no cursor, keeping the previous one"),
    }
    Ok((report, delta))
}

async fn bootstrap(inner: &Inner, cancel: &CancellationToken, progress: &mut PassProgress) {
    inner.events.set_state(SyncState::FetchingSnapshot);
    let snapshot = match inner.snapshots.fetch_full_snapshot(cancel).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            progress.fail(None, &SyncError::from(err));
            return;
        }
    };
    let Snapshot {
        now,
        next_cursor,
        folders,
        lists,
        items,
        notifications,
        shares,
    } = snapshot;
    let cursor = next_cursor.unwrap_or(now);
    info!(cursor = %cursor, "Bootstrapping from snapshot");

    for kind in ResourceKind::SYNC_ORDER {
        if cancel.is_cancelled() {
            progress.cancelled = true;
            break;
        }
        inner.events.set_state(SyncState::Reconciling(kind));

        let result = match kind {
            ResourceKind::Folder => apply_portion(inner, &folders, &[], &cursor).await,
            ResourceKind::Task => apply_portion(inner, &lists, &[], &cursor).await,
            ResourceKind::Item => apply_portion(inner, &items, &lists, &cursor).await,
            ResourceKind::Notification => {
                apply_portion(inner, &notifications, &lists, &cursor).await
            }
            ResourceKind::Share => apply_portion(inner, &shares, &lists, &cursor).await,
        };

        match result {
            Ok(report) => {
                publish_reconciled(inner, &report);
                progress.succeeded.push(kind);
            }
            Err(err) => {
                if progress.fail(Some(kind), &err) {
                    break;
                }
            }
        }
    }
}

async fn apply_portion<R: MergeTarget>(
    inner: &Inner,
    records: &[R],
    hints: &[ListRecord],
    cursor: &str,
) -> SyncResult<ReconcileReport> {
    let delta = Delta::upserts_only(records.to_vec(), Some(cursor.to_string()));
    let report = inner.engine.apply_delta(&delta, hints).await?;
    inner.db.sync_state().save_cursor(R::KIND, cursor).await?;
    Ok(report)
}

fn publish_reconciled(inner: &Inner, report: &ReconcileReport) {
    if report.changed() {
        inner
            .events
            .publish(SyncEvent::StoreChanged(StoreChange::Reconciled {
                kind: report.kind,
                upserted: report.upserted,
                deleted: report.deleted,
            }));
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder wiring the orchestrator's collaborators together.
pub struct SyncOrchestratorBuilder {
    config: SyncConfig,
    db: Option<Database>,
    token_store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl SyncOrchestratorBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncOrchestratorBuilder {
            config,
            db: None,
            token_store: None,
            refresher: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Defaults to the database-backed store.
    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Defaults to `POST {base}/auth/refresh`.
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn build(self) -> SyncResult<SyncOrchestrator> {
        self.config.validate()?;
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;

        let store: Arc<dyn TokenStore> = match self.token_store {
            Some(store) => store,
            None => Arc::new(SqliteTokenStore::new(&db)),
        };
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpTokenRefresher::new(&self.config)?),
        };
        let tokens = AccessTokenManager::new(store, refresher, self.config.refresh_margin());
        let api = ApiClient::new(&self.config.api, tokens.clone())?;

        let clients = ResourceClients {
            folders: ResourceSyncClient::new(api.clone())?,
            lists: ResourceSyncClient::new(api.clone())?,
            items: ResourceSyncClient::new(api.clone())?,
            notifications: ResourceSyncClient::new(api.clone())?,
            shares: ResourceSyncClient::new(api.clone())?,
        };
        let snapshots = SnapshotClient::new(api, db.clone())?;
        let engine = ReconciliationEngine::new(db.clone(), self.config.sync.deferred_warn_attempts);

        info!(base_url = %self.config.api.base_url, "Sync orchestrator ready");
        Ok(SyncOrchestrator {
            inner: Arc::new(Inner {
                db,
                tokens,
                engine,
                clients,
                snapshots,
                events: EventBus::new(self.config.sync.event_capacity),
                settings: self.config.sync,
                current: Mutex::new(None),
                pass_counter: AtomicU64::new(0),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        config_for, expired_pair, memory_db, valid_pair, CountingRefresher, RejectingRefresher,
    };
    use crate::token_store::MemoryTokenStore;
    use mockito::{Matcher, Mock, ServerGuard};
    use std::time::Duration;

    const EMPTY: &str = r#"{"now": "c1", "upserts": [], "deletes": []}"#;

    async fn orchestrator(
        server: &ServerGuard,
        db: &Database,
        bootstrap: bool,
        refresher: Arc<dyn TokenRefresher>,
        pair: tasklane_core::TokenPair,
    ) -> SyncOrchestrator {
        let mut config = config_for(&server.url());
        config.sync.bootstrap_with_snapshot = bootstrap;
        SyncOrchestratorBuilder::new(config)
            .with_database(db.clone())
            .with_token_store(Arc::new(MemoryTokenStore::with_tokens(pair)))
            .with_refresher(refresher)
            .build()
            .unwrap()
    }

    async fn plain(server: &ServerGuard, db: &Database) -> SyncOrchestrator {
        orchestrator(
            server,
            db,
            false,
            Arc::new(CountingRefresher::default()),
            valid_pair("a1"),
        )
        .await
    }

    async fn collection(server: &mut ServerGuard, path: &str, status: usize, body: &str) -> Mock {
        server
            .mock("GET", path)
            .match_query(Matcher::Any)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_full_pass_reconciles_every_kind_in_order() {
        let mut server = mockito::Server::new_async().await;
        collection(
            &mut server,
            "/folders",
            200,
            r#"{"now": "c1", "upserts": [{"id": "f1", "name": "Work"}]}"#,
        )
        .await;
        collection(
            &mut server,
            "/lists",
            200,
            r#"{"now": "c1", "upserts": [{"id": "t1", "folderId": "f1", "name": "Report", "completed": 1}]}"#,
        )
        .await;
        collection(
            &mut server,
            "/items",
            200,
            r#"{"now": "c1", "upserts": [{"id": "i1", "listId": "t1", "name": "Outline"}]}"#,
        )
        .await;
        collection(&mut server, "/notifications", 200, EMPTY).await;
        collection(&mut server, "/shares", 200, EMPTY).await;

        let db = memory_db().await;
        let sync = plain(&server, &db).await;
        let mut events = sync.subscribe();

        let report = sync.trigger_sync(SyncTrigger::Manual).await;
        assert_eq!(report.outcome, PassOutcome::Succeeded);
        assert_eq!(report.succeeded, ResourceKind::SYNC_ORDER.to_vec());
        assert!(report.notice().is_none());
        assert_eq!(sync.current_state(), SyncState::Idle);

        let folder = db.folders().get_by_server_id("f1").await.unwrap().unwrap();
        let task = db.tasks().get_by_server_id("t1").await.unwrap().unwrap();
        assert_eq!(task.folder_id.as_deref(), Some(folder.id.as_str()));
        assert_eq!(db.items().list_for_task(&task.id).await.unwrap().len(), 1);

        let cursors = db.sync_state().load_cursors().await.unwrap();
        assert_eq!(cursors.len(), 5);
        assert!(cursors.values().all(|c| c == "c1"));

        let mut reconciled = Vec::new();
        let mut finished = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::StoreChanged(StoreChange::Reconciled { kind, .. }) => reconciled.push(kind),
                SyncEvent::PassFinished(done) => finished = done.pass_id == report.pass_id,
                _ => {}
            }
        }
        assert_eq!(
            reconciled,
            vec![ResourceKind::Folder, ResourceKind::Task, ResourceKind::Item]
        );
        assert!(finished);
    }

    #[tokio::test]
    async fn test_failing_kind_does_not_block_the_rest() {
        let mut server = mockito::Server::new_async().await;
        collection(
            &mut server,
            "/folders",
            200,
            r#"{"now": "c1", "upserts": [{"id": "f1", "name": "Work"}]}"#,
        )
        .await;
        collection(&mut server, "/lists", 503, "unavailable").await;
        collection(
            &mut server,
            "/items",
            200,
            r#"{"now": "c1", "upserts": [{"id": "i1", "listId": "t1", "name": "Outline"}]}"#,
        )
        .await;
        collection(&mut server, "/notifications", 200, EMPTY).await;
        collection(&mut server, "/shares", 200, r#"{"upserts": [{"kind": "bogus"}]}"#).await;

        let db = memory_db().await;
        let report = plain(&server, &db).await.trigger_sync(SyncTrigger::PullToRefresh).await;

        assert_eq!(report.outcome, PassOutcome::PartiallyFailed);
        assert_eq!(
            report.failed_kinds(),
            vec![ResourceKind::Task, ResourceKind::Share]
        );
        assert_eq!(report.failed[0].failure, FailureKind::ServerError);
        assert_eq!(report.failed[1].failure, FailureKind::DecodeFailure);
        assert!(matches!(report.notice(), Some(UserNotice::Dismissible(msg)) if msg.contains("share")));

        assert!(db.folders().get_by_server_id("f1").await.unwrap().is_some());
        assert_eq!(db.sync_state().deferred_count().await.unwrap(), 1);
        assert!(db.sync_state().get_cursor(ResourceKind::Task).await.unwrap().is_none());
        assert!(db.sync_state().get_cursor(ResourceKind::Share).await.unwrap().is_none());
        assert_eq!(
            db.sync_state().get_cursor(ResourceKind::Item).await.unwrap().as_deref(),
            Some("c1")
        );
    }

    #[tokio::test]
    async fn test_transient_only_failures_are_silent() {
        let mut server = mockito::Server::new_async().await;
        for path in ["/folders", "/lists", "/items", "/notifications", "/shares"] {
            collection(&mut server, path, 502, "bad gateway").await;
        }

        let db = memory_db().await;
        let report = plain(&server, &db).await.trigger_sync(SyncTrigger::Scheduled).await;
        assert_eq!(report.outcome, PassOutcome::Failed);
        assert!(report.only_transient_failures());
        assert!(report.notice().is_none());
    }

    #[tokio::test]
    async fn test_cursor_kept_when_reconcile_fails() {
        let mut server = mockito::Server::new_async().await;
        collection(&mut server, "/folders", 200, EMPTY).await;
        let lists = server
            .mock("GET", "/lists")
            .match_query(Matcher::UrlEncoded("since".into(), "c0".into()))
            .with_status(200)
            .with_body(r#"{"now": "c1", "upserts": [{"id": "t1", "name": "Report"}]}"#)
            .create_async()
            .await;
        collection(&mut server, "/items", 200, EMPTY).await;
        collection(&mut server, "/notifications", 200, EMPTY).await;
        collection(&mut server, "/shares", 200, EMPTY).await;

        let db = memory_db().await;
        for kind in ResourceKind::SYNC_ORDER {
            db.sync_state().save_cursor(kind, "c0").await.unwrap();
        }
        sqlx::query(
            "CREATE TRIGGER reject_tasks BEFORE INSERT ON tasks \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let report = plain(&server, &db).await.trigger_sync(SyncTrigger::Manual).await;
        lists.assert_async().await;

        assert_eq!(report.failed_kinds(), vec![ResourceKind::Task]);
        assert_eq!(report.failed[0].failure, FailureKind::Storage);
        assert_eq!(
            db.sync_state().get_cursor(ResourceKind::Task).await.unwrap().as_deref(),
            Some("c0")
        );
        assert_eq!(
            db.sync_state().get_cursor(ResourceKind::Folder).await.unwrap().as_deref(),
            Some("c1")
        );
    }

    #[tokio::test]
    async fn test_concurrent_triggers_share_one_pass() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for path in ["/folders", "/lists", "/items", "/notifications", "/shares"] {
            mocks.push(
                server
                    .mock("GET", path)
                    .match_query(Matcher::Any)
                    .with_status(200)
                    .with_body(EMPTY)
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let db = memory_db().await;
        let refresher = Arc::new(CountingRefresher::with_delay(Duration::from_millis(100)));
        let sync = orchestrator(&server, &db, false, refresher.clone(), expired_pair("old")).await;

        let (a, b, c) = tokio::join!(
            sync.trigger_sync(SyncTrigger::Manual),
            sync.trigger_sync(SyncTrigger::AppForeground),
            sync.trigger_sync(SyncTrigger::PullToRefresh),
        );

        assert_eq!(a.pass_id, b.pass_id);
        assert_eq!(b.pass_id, c.pass_id);
        assert_eq!(a.trigger, SyncTrigger::Manual);
        assert_eq!(refresher.calls(), 1);
        for mock in &mocks {
            mock.assert_async().await;
        }
        assert!(!sync.is_running().await);
    }

    #[tokio::test]
    async fn test_bootstrap_from_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let snapshot = server
            .mock("GET", "/sync/snapshot")
            .with_status(200)
            .with_body(
                r#"{
                    "now": "2026-02-01T00:00:00Z",
                    "nextCursor": "boot-1",
                    "folders": [{"id": "f1", "name": "Inbox", "system": true}],
                    "lists": [{"id": "t1", "folderId": "f1", "name": "Buy milk", "completed": 0}],
                    "items": [{"id": "i1", "listId": "t1", "name": "Whole"}],
                    "notifications": [],
                    "shares": [{"kind": "member", "id": "s1", "listId": "t1", "userId": "u2"}]
                }"#,
            )
            .expect(1)
            .create_async()
            .await;
        let deltas = server
            .mock("GET", Matcher::Regex("^/(folders|lists|items|notifications|shares)".into()))
            .expect(0)
            .create_async()
            .await;

        let db = memory_db().await;
        let sync = orchestrator(
            &server,
            &db,
            true,
            Arc::new(CountingRefresher::default()),
            valid_pair("a1"),
        )
        .await;
        let report = sync.trigger_sync(SyncTrigger::Login).await;

        snapshot.assert_async().await;
        deltas.assert_async().await;
        assert_eq!(report.outcome, PassOutcome::Succeeded);
        assert_eq!(db.tasks().count().await.unwrap(), 1);
        assert_eq!(db.items().count().await.unwrap(), 1);
        assert_eq!(db.shares().count().await.unwrap(), 1);

        let cursors = db.sync_state().load_cursors().await.unwrap();
        assert_eq!(cursors.len(), 5);
        assert!(cursors.values().all(|c| c == "boot-1"));
    }

    #[tokio::test]
    async fn test_expired_session_requires_reauthentication() {
        let mut server = mockito::Server::new_async().await;
        let any = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let db = memory_db().await;
        let sync = orchestrator(&server, &db, true, Arc::new(RejectingRefresher), expired_pair("old")).await;
        let mut events = sync.subscribe();

        let report = sync.trigger_sync(SyncTrigger::Manual).await;
        any.assert_async().await;

        assert_eq!(report.outcome, PassOutcome::ReauthenticationRequired);
        assert_eq!(report.notice(), Some(UserNotice::Reauthenticate));
        assert!(!sync.tokens().has_session().await);

        let mut saw_prompt = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::ReauthenticationRequired) {
                saw_prompt = true;
            }
        }
        assert!(saw_prompt);
    }

    #[tokio::test]
    async fn test_cancel_running_pass() {
        let server = mockito::Server::new_async().await;
        let db = memory_db().await;
        let refresher = Arc::new(CountingRefresher::with_delay(Duration::from_secs(5)));
        let sync = orchestrator(&server, &db, false, refresher, expired_pair("old")).await;
        assert!(!sync.cancel_current_pass().await);

        let running = tokio::spawn({
            let sync = sync.clone();
            async move { sync.trigger_sync(SyncTrigger::Manual).await }
        });
        while !sync.is_running().await {
            tokio::task::yield_now().await;
        }
        assert!(sync.cancel_current_pass().await);

        let report = running.await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Cancelled);
        assert!(report.notice().is_none());
        assert!(db.sync_state().load_cursors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_and_purge_emit_store_changes() {
        let server = mockito::Server::new_async().await;
        let db = memory_db().await;
        let sync = plain(&server, &db).await;
        let mut events = sync.subscribe();

        let task = db
            .tasks()
            .create_local(tasklane_core::NewTask {
                name: "Old".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        db.tasks().mark_removed(&task.id).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = sync.export_snapshot(&dir.path().join("b.json")).await.unwrap();
        assert_eq!(sync.purge_removed().await.unwrap(), 1);
        let summary = sync.import_snapshot(&path).await.unwrap();
        assert_eq!(summary.tasks, 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::StoreChanged(StoreChange::Purged { tasks: 1 })
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::StoreChanged(StoreChange::Imported { tasks: 1, items: 0 })
        ));
    }

    #[test]
    fn test_builder_requires_database() {
        let err = SyncOrchestratorBuilder::new(SyncConfig::default())
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
