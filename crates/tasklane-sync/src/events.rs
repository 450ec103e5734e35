//! # Sync Events
//!
//! How collaborators observe the sync core.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          EventBus                                       │
//! │                                                                         │
//! │  watch<SyncState>        latest state only (status badge, spinner)      │
//! │     Idle → TokenCheck → Fetching(kind) → Reconciling(kind) → Idle       │
//! │     Idle → Failed { reason } → Idle                                     │
//! │                                                                         │
//! │  broadcast<SyncEvent>    every event, lagging receivers skip ahead      │
//! │     StateChanged · StoreChanged · PassFinished ·                        │
//! │     ReauthenticationRequired                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! UI collaborators re-run their own store queries on `StoreChanged`.

use serde::Serialize;
use tasklane_core::ResourceKind;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::orchestrator::PassReport;

/// Where the orchestrator currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    TokenCheck,
    FetchingSnapshot,
    Fetching(ResourceKind),
    Reconciling(ResourceKind),
    Failed { reason: String },
}

impl SyncState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, SyncState::Idle | SyncState::Failed { .. })
    }
}

/// What changed in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StoreChange {
    Reconciled {
        kind: ResourceKind,
        upserted: usize,
        deleted: usize,
    },
    Imported {
        tasks: usize,
        items: usize,
    },
    Purged {
        tasks: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SyncEvent {
    StateChanged(SyncState),
    StoreChanged(StoreChange),
    PassFinished(PassReport),
    ReauthenticationRequired,
}

/// Fan-out of state and events to any number of subscribers.
#[derive(Debug)]
pub struct EventBus {
    events: broadcast::Sender<SyncEvent>,
    state: watch::Sender<SyncState>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (state, _) = watch::channel(SyncState::Idle);
        EventBus { events, state }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Events as a stream. Lagged gaps are skipped.
    pub fn stream(&self) -> impl Stream<Item = SyncEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok())
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Sends to current subscribers. Having none is not an error.
    pub fn publish(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    /// Updates the watched state and emits `StateChanged` when it differs.
    pub fn set_state(&self, next: SyncState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            self.publish(SyncEvent::StateChanged(next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_changes_are_published_once() {
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let state = bus.state();

        bus.set_state(SyncState::TokenCheck);
        bus.set_state(SyncState::TokenCheck);
        bus.set_state(SyncState::Fetching(ResourceKind::Folder));

        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::StateChanged(SyncState::TokenCheck)
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::StateChanged(SyncState::Fetching(ResourceKind::Folder))
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(*state.borrow(), SyncState::Fetching(ResourceKind::Folder));
        assert!(bus.current_state().is_busy());
    }

    #[tokio::test]
    async fn test_stream_yields_published_events() {
        let bus = EventBus::new(4);
        let stream = bus.stream();
        tokio::pin!(stream);

        bus.publish(SyncEvent::StoreChanged(StoreChange::Purged { tasks: 3 }));
        let event = stream.next().await.unwrap();
        assert!(matches!(
            event,
            SyncEvent::StoreChanged(StoreChange::Purged { tasks: 3 })
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish(SyncEvent::ReauthenticationRequired);
        assert_eq!(bus.current_state(), SyncState::Idle);
    }

    #[test]
    fn test_state_serialises_with_detail() {
        let json = serde_json::to_value(SyncState::Reconciling(ResourceKind::Item)).unwrap();
        assert_eq!(json["state"], "reconciling");
        assert_eq!(json["detail"], "item");
    }
}
