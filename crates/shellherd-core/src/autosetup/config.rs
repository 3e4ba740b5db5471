//! Auto-setup configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Auto-setup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSetupConfig {
    /// Seconds a command may run before it is marked timed out
    pub command_timeout_secs: u64,
    /// Advance to the next group even when the current one had failures
    pub continue_on_failure: bool,
}

impl Default for AutoSetupConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            continue_on_failure: false,
        }
    }
}

impl AutoSetupConfig {
    /// Per-command timeout
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(Error::InvalidConfig {
                field: "autosetup.command_timeout_secs".to_string(),
                message: "timeout must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}
