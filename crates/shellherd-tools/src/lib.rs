//! Shellherd Tools - supervision primitives
//!
//! This crate provides the building blocks the rest of Shellherd drives:
//! - Events: the typed event channel every component publishes to
//! - Runner: the seam for invoking external commands
//! - Process tree: descendant discovery and termination cascades
//! - PTY: interactive shell sessions with completion detection
//! - Containers: container engine lifecycle operations, single and bulk

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod containers;
pub mod error;
pub mod events;
pub mod process_tree;
pub mod pty;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;

pub use containers::{
    BulkItemResult, BulkOperation, BulkResult, BulkSummary, ContainerConfig, ContainerList,
    ContainerManager, EngineOutcome, ListFormat, ListOutcome,
};
pub use error::{Error, Result};
pub use events::{
    BridgeEvent, EventBus, Notifier, OutputStream, ProcessState, SessionId, SessionStatus,
    Severity, Subscription,
};
pub use process_tree::{native_platform, ProcessInfo, ProcessPlatform, ProcessTree};
pub use pty::{KillOutcome, PtyConfig, PtyManager, SpawnOutcome, SpawnRequest};
pub use runner::{CommandOutput, CommandRunner, TokioCommandRunner};
