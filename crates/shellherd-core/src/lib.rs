//! Shellherd Core - session state and remediation runs
//!
//! This crate sits on top of `shellherd-tools` and provides:
//! - State: reducing raw lifecycle events into one canonical record per session
//! - Auto-setup: running prioritized groups of fix commands with timeouts

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod autosetup;
pub mod error;
pub mod state;

pub use autosetup::{
    session_id_for, AutoSetupConfig, AutoSetupOrchestrator, CommandGroup, CommandState,
    FixCommand, FixStatus, RunSnapshot, RunStatus, SessionLauncher,
};
pub use error::{Error, Result};
pub use state::{OutputChunk, SessionRecord, SessionStateReducer, SessionStore};
