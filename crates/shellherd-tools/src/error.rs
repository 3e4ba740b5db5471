//! Error types for shellherd-tools

use thiserror::Error;

/// Tool error type
#[derive(Debug, Error)]
pub enum Error {
    /// A live process already owns the session id
    #[error("session already running: {0}")]
    SessionConflict(String),

    /// Pseudo-terminal allocation or spawn failed
    #[error("pty error: {0}")]
    Pty(String),

    /// External command failed
    #[error("execution failed: {0}")]
    Execution(String),

    /// Malformed request payload
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
