//! Auto-setup - prioritized remediation runs.
//!
//! Fix commands are grouped by priority; groups run one at a time, every
//! command in a group runs concurrently in its own session.

/// Orchestrator configuration.
pub mod config;
/// Session launching seam.
pub mod launcher;
/// The orchestrator itself.
pub mod orchestrator;
/// Run, group and command types.
pub mod types;

pub use config::AutoSetupConfig;
pub use launcher::SessionLauncher;
pub use orchestrator::{session_id_for, AutoSetupOrchestrator, SESSION_PREFIX};
pub use types::{CommandGroup, CommandState, FixCommand, FixStatus, RunSnapshot, RunStatus};

#[cfg(test)]
mod tests;
