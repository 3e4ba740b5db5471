use crate::events::{BridgeEvent, Notifier};
use std::sync::{Arc, Mutex};

/// Notifier that records every event for later assertions.
#[derive(Default, Clone)]
pub(crate) struct RecordingNotifier {
    events: Arc<Mutex<Vec<BridgeEvent>>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<BridgeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(BridgeEvent::kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: BridgeEvent) {
        self.events.lock().unwrap().push(event);
    }
}
