use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Caller-supplied session identifier.
///
/// Producers outside the process sometimes send numeric ids, so this
/// deserializes from either a JSON string or a JSON number. It always
/// serializes as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Number(number) => Self(number.to_string()),
        })
    }
}

/// Canonical status of a session as seen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Spawn requested, no process yet
    #[default]
    PendingSpawn,
    /// Shell is up
    Running,
    /// Shell has child processes doing work
    Processing,
    /// Finished successfully
    Done,
    /// Finished with a non-zero exit
    Error,
    /// Killed
    Stopped,
    /// Did not finish within its time bound
    Timeout,
}

impl SessionStatus {
    /// Terminal states never transition again except through an explicit
    /// completion report.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Stopped | Self::Timeout)
    }

    /// Classify how a process exited.
    ///
    /// A signal always wins over an exit code.
    #[must_use]
    pub fn from_exit(code: Option<i32>, signal: Option<i32>) -> (Self, String) {
        match (code, signal) {
            (_, Some(signal)) => (Self::Stopped, format!("Terminated by signal {signal}")),
            (Some(0), None) => (Self::Done, "Exited successfully".to_string()),
            (Some(code), None) => (Self::Error, format!("Exited with error code {code}")),
            (None, None) => (Self::Error, "Exited with unknown status".to_string()),
        }
    }

    /// Wire name of the status
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingSpawn => "pending_spawn",
            Self::Running => "running",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output (a PTY merges both streams here)
    #[default]
    Stdout,
    /// Standard error
    Stderr,
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Something needs attention
    Warning,
    /// An operation failed
    Error,
}

/// One process reported in a status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    /// OS process id
    pub pid: u32,
    /// Command line
    pub command: String,
    /// Free-form state description
    pub state: String,
}

/// Every lifecycle signal that crosses the bridge.
///
/// Serialized with a kebab-case `type` tag and camelCase fields, which is
/// the shape the presentation layer consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum BridgeEvent {
    /// A session was requested; resets any finished record for the id
    SessionSpawn {
        /// Session
        session_id: SessionId,
        /// Command line
        command: String,
        /// Terminal columns
        cols: u16,
        /// Terminal rows
        rows: u16,
    },

    /// A chunk of terminal output
    PtyOutput {
        /// Session
        session_id: SessionId,
        /// Decoded text
        output: String,
        /// Source stream
        #[serde(default)]
        stream: OutputStream,
    },

    /// The session's shell process is running
    ProcessStarted {
        /// Session
        session_id: SessionId,
        /// Shell pid when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },

    /// The session's shell process exited
    ProcessEnded {
        /// Session
        session_id: SessionId,
        /// Exit code when the process exited normally
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        /// Signal number when the process was killed by a signal
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
    },

    /// A session kill is starting
    ProcessTerminating {
        /// Session id being killed
        name: String,
    },

    /// A session kill finished
    ProcessTerminated {
        /// Session id that was killed
        name: String,
        /// Whether every process was signalled successfully
        success: bool,
        /// First failure, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A container stop is starting
    ContainerTerminating {
        /// Container name
        name: String,
    },

    /// A container stop finished
    ContainerTerminated {
        /// Container name
        name: String,
        /// Whether the engine reported success
        success: bool,
        /// Engine error text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The command typed into a session completed
    CommandFinished {
        /// Session
        session_id: SessionId,
        /// Exit code of the command
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// Final status, `done` when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<SessionStatus>,
        /// Human-readable description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_status: Option<String>,
    },

    /// Detailed status of a running session
    CommandStatusUpdate {
        /// Session
        session_id: SessionId,
        /// Status to adopt
        overall_status: SessionStatus,
        /// Human-readable description
        status_description: String,
        /// Processes observed under the session
        #[serde(default)]
        process_states: Vec<ProcessState>,
        /// Number of processes observed
        #[serde(default)]
        process_count: usize,
    },

    /// A remediation command changed status
    FixCommandStatus {
        /// Command id
        command_id: String,
        /// New status
        status: String,
    },

    /// A remediation run changed status
    FixRunStatus {
        /// New status
        status: String,
    },

    /// User-facing message
    Notification {
        /// Message text
        message: String,
        /// Severity
        severity: Severity,
    },
}

impl BridgeEvent {
    /// Session this event is scoped to, if any.
    ///
    /// Kill brackets carry the session id in `name`, so they count as
    /// session-scoped. Container and remediation events do not.
    #[must_use]
    pub fn session_key(&self) -> Option<&str> {
        match self {
            Self::SessionSpawn { session_id, .. }
            | Self::PtyOutput { session_id, .. }
            | Self::ProcessStarted { session_id, .. }
            | Self::ProcessEnded { session_id, .. }
            | Self::CommandFinished { session_id, .. }
            | Self::CommandStatusUpdate { session_id, .. } => Some(session_id.as_str()),
            Self::ProcessTerminating { name } | Self::ProcessTerminated { name, .. } => {
                Some(name.as_str())
            }
            Self::ContainerTerminating { .. }
            | Self::ContainerTerminated { .. }
            | Self::FixCommandStatus { .. }
            | Self::FixRunStatus { .. }
            | Self::Notification { .. } => None,
        }
    }

    /// Shorthand for a notification event
    #[must_use]
    pub fn notification(message: impl Into<String>, severity: Severity) -> Self {
        Self::Notification {
            message: message.into(),
            severity,
        }
    }

    /// Wire name of the event type
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionSpawn { .. } => "session-spawn",
            Self::PtyOutput { .. } => "pty-output",
            Self::ProcessStarted { .. } => "process-started",
            Self::ProcessEnded { .. } => "process-ended",
            Self::ProcessTerminating { .. } => "process-terminating",
            Self::ProcessTerminated { .. } => "process-terminated",
            Self::ContainerTerminating { .. } => "container-terminating",
            Self::ContainerTerminated { .. } => "container-terminated",
            Self::CommandFinished { .. } => "command-finished",
            Self::CommandStatusUpdate { .. } => "command-status-update",
            Self::FixCommandStatus { .. } => "fix-command-status",
            Self::FixRunStatus { .. } => "fix-run-status",
            Self::Notification { .. } => "notification",
        }
    }
}
