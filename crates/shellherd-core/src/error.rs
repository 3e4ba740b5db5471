//! Error types for shellherd-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// A run operation was called before `open`
    #[error("no remediation run has been opened")]
    NotOpened,

    /// `open` was called while commands are still running
    #[error("a remediation run is already in progress")]
    RunInProgress,

    /// No command with this id in the open run
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// No group with this priority in the open run
    #[error("unknown group priority: {0}")]
    UnknownGroup(u32),

    /// Fix list rejected
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Invalid configuration
    #[error("invalid configuration: {field}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Tool layer error
    #[error("tool error: {0}")]
    Tool(#[from] shellherd_tools::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
