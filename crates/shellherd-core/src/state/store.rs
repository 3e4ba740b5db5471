use super::reducer::{SessionRecord, SessionStateReducer};
use shellherd_tools::{BridgeEvent, EventBus, SessionId};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

/// Shared, observable session state.
///
/// Wraps a [`SessionStateReducer`] and broadcasts every changed record so
/// the presentation layer (and the auto-setup orchestrator) can react.
#[derive(Clone)]
pub struct SessionStore {
    reducer: Arc<RwLock<SessionStateReducer>>,
    changes: broadcast::Sender<SessionRecord>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionStateReducer::new())
    }
}

impl SessionStore {
    /// Create a store around `reducer`
    #[must_use]
    pub fn new(reducer: SessionStateReducer) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            reducer: Arc::new(RwLock::new(reducer)),
            changes,
        }
    }

    /// Apply an event and broadcast the changed record, if any.
    pub async fn apply(&self, event: &BridgeEvent) -> Option<SessionRecord> {
        let record = {
            let mut reducer = self.reducer.write().await;
            let id = reducer.apply(event)?;
            reducer.get(&id).cloned()
        }?;
        let _ = self.changes.send(record.clone());
        Some(record)
    }

    /// Feed every event published on `bus` into the store until the bus
    /// closes.
    pub fn attach(&self, bus: &EventBus) -> JoinHandle<()> {
        let store = self.clone();
        let mut subscription = bus.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                store.apply(&event).await;
            }
            debug!("Event bus closed; session store detached");
        })
    }

    /// Receive every changed record from now on
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<SessionRecord> {
        self.changes.subscribe()
    }

    /// Current record of one session
    pub async fn snapshot(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.reducer.read().await.get(session_id).cloned()
    }

    /// Current records of all sessions, ordered by id
    pub async fn snapshots(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> =
            self.reducer.read().await.records().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Correlate a container with a session
    pub async fn associate_container(&self, session_id: &SessionId, name: &str) -> bool {
        let record = {
            let mut reducer = self.reducer.write().await;
            if !reducer.associate_container(session_id, name) {
                return false;
            }
            reducer.get(session_id).cloned()
        };
        if let Some(record) = record {
            let _ = self.changes.send(record);
        }
        true
    }
}
