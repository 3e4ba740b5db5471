//! Auto-setup run types

use serde::{Deserialize, Serialize};
use std::fmt;

/// One remediation command as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixCommand {
    /// Stable command id
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Shell command line
    #[serde(alias = "command")]
    pub fix_command: String,
    /// Lower runs first
    #[serde(default)]
    pub priority: u32,
}

impl FixCommand {
    /// Create a fix command
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        fix_command: impl Into<String>,
        priority: u32,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            fix_command: fix_command.into(),
            priority,
        }
    }
}

/// Status of one command within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    /// Not started
    Pending,
    /// Session open, waiting for completion
    Running,
    /// Completed successfully
    Success,
    /// Completed with an error, or could not start
    Failed,
    /// Terminated on request
    Stopped,
    /// Did not complete within the timeout
    Timeout,
}

impl FixStatus {
    /// Whether the command will not change status on its own
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Nothing opened
    #[default]
    Idle,
    /// Opened, not started
    Preparing,
    /// A group is executing
    Running,
    /// Every executed command succeeded
    Success,
    /// At least one executed command did not succeed
    Failed,
    /// Stopped on request
    Stopped,
}

impl RunStatus {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command and its current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandState {
    /// The command
    #[serde(flatten)]
    pub fix: FixCommand,
    /// Current status
    pub status: FixStatus,
    /// Last status description from the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Commands sharing one priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandGroup {
    /// Group priority
    pub priority: u32,
    /// Commands in caller order
    pub commands: Vec<CommandState>,
}

impl CommandGroup {
    /// Whether every command reached a terminal status
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.commands.iter().all(|c| c.status.is_terminal())
    }

    /// Whether every command succeeded
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.commands.iter().all(|c| c.status == FixStatus::Success)
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// Run status
    pub status: RunStatus,
    /// Priority of the executing group
    pub active_group: Option<u32>,
    /// All groups, ascending priority
    pub groups: Vec<CommandGroup>,
}

impl RunSnapshot {
    /// Status of one command
    #[must_use]
    pub fn command_status(&self, command_id: &str) -> Option<FixStatus> {
        self.groups
            .iter()
            .flat_map(|g| &g.commands)
            .find(|c| c.fix.id == command_id)
            .map(|c| c.status)
    }
}
