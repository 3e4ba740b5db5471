use super::types::{BridgeEvent, SessionId};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Anything that can receive outbound lifecycle events.
///
/// Components take an `Arc<dyn Notifier>` rather than a concrete bus so
/// tests can capture what was emitted.
pub trait Notifier: Send + Sync {
    /// Deliver one event
    fn notify(&self, event: BridgeEvent);
}

/// Broadcast-based event bus for session lifecycle events.
///
/// Uses `tokio::broadcast` so multiple subscribers can receive the same events.
/// Slow subscribers will miss events (lagged) rather than blocking the publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every future event.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            session: None,
        }
    }

    /// Subscribe to the events scoped to one session.
    #[must_use]
    pub fn subscribe_session(&self, session_id: &SessionId) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            session: Some(session_id.clone()),
        }
    }

    /// Publish an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: BridgeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for EventBus {
    fn notify(&self, event: BridgeEvent) {
        self.publish(event);
    }
}

/// Handle to a live subscription on an [`EventBus`].
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<BridgeEvent>,
    session: Option<SessionId>,
}

impl Subscription {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once the bus is gone. Lagging skips the missed events
    /// with a warning instead of failing.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged; events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Session filter of this subscription, if any
    #[must_use]
    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    fn matches(&self, event: &BridgeEvent) -> bool {
        match &self.session {
            None => true,
            Some(id) => event.session_key() == Some(id.as_str()),
        }
    }
}
