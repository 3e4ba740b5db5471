//! Events - the single typed channel for lifecycle signals.
//!
//! PTY sessions, kill cascades, container operations and the remediation
//! orchestrator all publish [`BridgeEvent`]s; the state reducer and the
//! presentation layer subscribe.

/// Broadcast bus, subscriptions and the notifier seam.
pub mod bus;
/// Event and identifier definitions.
pub mod types;

pub use bus::{EventBus, Notifier, Subscription};
pub use types::{BridgeEvent, OutputStream, ProcessState, SessionId, SessionStatus, Severity};
