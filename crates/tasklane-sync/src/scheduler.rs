//! # Auto-Sync Scheduler
//!
//! Background loop that triggers `Scheduled` passes.
//!
//! ```text
//!   ┌──────────┐  delay elapsed   ┌──────────────────────────┐
//!   │  sleep   │ ───────────────► │ trigger_sync(Scheduled)  │
//!   └──────────┘                  └────────────┬─────────────┘
//!        ▲                                     │
//!        │   clean pass        → interval, reset backoff
//!        └── transient only    → ExponentialBackoff::next_backoff()
//!            reauth required   → stop
//!            shutdown signal   → stop
//! ```

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{PassOutcome, PassReport, SyncOrchestrator, SyncTrigger};

/// Delays used by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Schedule {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Schedule {
            interval: Duration::from_secs(settings.interval_secs),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// Delay before the next pass, or `None` when the loop should stop.
fn next_delay(
    schedule: &Schedule,
    backoff: &mut ExponentialBackoff,
    report: &PassReport,
) -> Option<Duration> {
    match report.outcome {
        PassOutcome::ReauthenticationRequired => None,
        _ if report.only_transient_failures() => {
            Some(backoff.next_backoff().unwrap_or(schedule.max_backoff))
        }
        _ => {
            backoff.reset();
            Some(schedule.interval)
        }
    }
}

/// Handle for controlling the auto-sync loop.
#[derive(Debug)]
pub struct AutoSyncHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Stops the loop. A pass already running finishes on its own.
    ///
    /// Fails with [`SyncError::ShuttingDown`] once the loop has exited, for
    /// example after the session expired.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct AutoSync;

impl AutoSync {
    /// Starts the loop with delays taken from `settings`.
    pub fn spawn(sync: SyncOrchestrator, settings: &SyncSettings) -> AutoSyncHandle {
        Self::with_schedule(sync, Schedule::from_settings(settings))
    }

    pub fn with_schedule(sync: SyncOrchestrator, schedule: Schedule) -> AutoSyncHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run(sync, schedule, shutdown_rx));
        AutoSyncHandle { shutdown_tx, task }
    }
}

async fn run(sync: SyncOrchestrator, schedule: Schedule, mut shutdown_rx: mpsc::Receiver<()>) {
    info!(interval = ?schedule.interval, "Auto-sync starting");
    let mut backoff = schedule.backoff();
    let mut delay = schedule.interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => {
                info!("Auto-sync shutting down");
                break;
            }
        }

        let report = tokio::select! {
            report = sync.trigger_sync(SyncTrigger::Scheduled) => report,
            _ = shutdown_rx.recv() => {
                info!("Auto-sync shutting down during pass");
                break;
            }
        };

        match next_delay(&schedule, &mut backoff, &report) {
            Some(next) => {
                debug!(pass_id = report.pass_id, outcome = ?report.outcome, ?next, "Next scheduled pass");
                delay = next;
            }
            None => {
                warn!("Session expired, auto-sync stopped until sign-in");
                break;
            }
        }
    }

    info!("Auto-sync stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::events::SyncEvent;
    use crate::orchestrator::{PassFailure, SyncOrchestratorBuilder};
    use crate::test_support::{config_for, expired_pair, memory_db, valid_pair, CountingRefresher, RejectingRefresher};
    use crate::token_store::MemoryTokenStore;
    use chrono::Utc;
    use mockito::Matcher;
    use std::sync::Arc;
    use tasklane_core::ResourceKind;

    fn report(outcome: PassOutcome, failures: &[FailureKind]) -> PassReport {
        PassReport {
            pass_id: 1,
            trigger: SyncTrigger::Scheduled,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            succeeded: Vec::new(),
            failed: failures
                .iter()
                .map(|&failure| PassFailure {
                    kind: Some(ResourceKind::Task),
                    failure,
                    message: "x".into(),
                })
                .collect(),
            outcome,
        }
    }

    fn schedule() -> Schedule {
        Schedule {
            interval: Duration::from_secs(300),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_from_settings() {
        let s = Schedule::from_settings(&SyncSettings::default());
        assert_eq!(s.interval, Duration::from_secs(300));
        assert_eq!(s.initial_backoff, Duration::from_millis(500));
        assert_eq!(s.max_backoff, Duration::from_secs(600));
    }

    #[test]
    fn test_backoff_after_transient_failures() {
        let schedule = schedule();
        let mut backoff = schedule.backoff();
        let transient = report(PassOutcome::Failed, &[FailureKind::Offline]);

        let first = next_delay(&schedule, &mut backoff, &transient).unwrap();
        assert!(first <= Duration::from_millis(750));
        let mut last = first;
        for _ in 0..30 {
            last = next_delay(&schedule, &mut backoff, &transient).unwrap();
        }
        assert!(last > first);
        assert!(last <= Duration::from_secs(900));

        let clean = report(PassOutcome::Succeeded, &[]);
        assert_eq!(next_delay(&schedule, &mut backoff, &clean), Some(schedule.interval));
        let again = next_delay(&schedule, &mut backoff, &transient).unwrap();
        assert!(again <= Duration::from_millis(750));
    }

    #[test]
    fn test_non_transient_failure_keeps_interval() {
        let schedule = schedule();
        let mut backoff = schedule.backoff();
        let decode = report(
            PassOutcome::PartiallyFailed,
            &[FailureKind::Timeout, FailureKind::DecodeFailure],
        );
        assert_eq!(next_delay(&schedule, &mut backoff, &decode), Some(schedule.interval));

        let reauth = report(PassOutcome::ReauthenticationRequired, &[]);
        assert_eq!(next_delay(&schedule, &mut backoff, &reauth), None);
    }

    #[tokio::test]
    async fn test_runs_scheduled_passes_until_shutdown() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"now": "c1"}"#)
            .create_async()
            .await;

        let db = memory_db().await;
        let mut config = config_for(&server.url());
        config.sync.bootstrap_with_snapshot = false;
        let sync = SyncOrchestratorBuilder::new(config)
            .with_database(db)
            .with_token_store(Arc::new(MemoryTokenStore::with_tokens(valid_pair("a1"))))
            .with_refresher(Arc::new(CountingRefresher::default()))
            .build()
            .unwrap();
        let mut events = sync.subscribe();

        let handle = AutoSync::with_schedule(
            sync,
            Schedule {
                interval: Duration::from_millis(20),
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(100),
            },
        );

        let mut finished = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while finished.len() < 2 {
                if let Ok(SyncEvent::PassFinished(report)) = events.recv().await {
                    finished.push(report);
                }
            }
        })
        .await
        .unwrap();

        assert!(finished.iter().all(|r| r.trigger == SyncTrigger::Scheduled));
        assert!(finished.iter().all(|r| r.outcome == PassOutcome::Succeeded));
        assert!(finished[0].pass_id < finished[1].pass_id);

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_session_expires() {
        let server = mockito::Server::new_async().await;
        let db = memory_db().await;
        let sync = SyncOrchestratorBuilder::new(config_for(&server.url()))
            .with_database(db)
            .with_token_store(Arc::new(MemoryTokenStore::with_tokens(expired_pair("old"))))
            .with_refresher(Arc::new(RejectingRefresher))
            .build()
            .unwrap();

        let handle = AutoSync::with_schedule(
            sync,
            Schedule {
                interval: Duration::from_millis(10),
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
            },
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let err = handle.shutdown().await.unwrap_err();
        assert!(matches!(err, SyncError::ShuttingDown));
        assert_eq!(err.failure_kind(), FailureKind::Cancelled);
    }
}
