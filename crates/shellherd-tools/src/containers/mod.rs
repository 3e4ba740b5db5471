//! Container lifecycle operations
//!
//! The container engine is the source of truth; nothing here caches
//! container state. Every call shells out through [`CommandRunner`] and
//! reports an [`EngineOutcome`] carrying the engine's own error text.

mod bulk;

pub use bulk::{BulkItemResult, BulkOperation, BulkResult, BulkSummary};

use crate::events::{BridgeEvent, Notifier};
use crate::runner::CommandRunner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Fixed message for an unparseable JSON listing.
pub const PARSE_ERROR: &str = "Failed to parse container information";

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Engine binary (`docker`, `podman`, ...)
    pub engine: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
        }
    }
}

/// Result of one engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutcome {
    /// Whether the engine reported success
    pub success: bool,
    /// Captured standard output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Failure description, the engine's stderr when it produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineOutcome {
    /// Failed outcome without engine output
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Output shape of a container listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    /// One container name per line
    #[default]
    Names,
    /// One JSON record per line
    Json,
}

/// Parsed container listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContainerList {
    /// Names in engine order
    Names(Vec<String>),
    /// Records in engine order
    Records(Vec<serde_json::Value>),
}

/// Result of a container listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOutcome {
    /// Whether the listing succeeded
    pub success: bool,
    /// Containers, when successful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<ContainerList>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ListOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            containers: None,
            error: Some(error.into()),
        }
    }
}

/// Issues lifecycle commands to the container engine.
#[derive(Clone)]
pub struct ContainerManager {
    runner: Arc<dyn CommandRunner>,
    notifier: Option<Arc<dyn Notifier>>,
    config: ContainerConfig,
}

impl ContainerManager {
    /// Create a manager using `runner` for engine calls
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            notifier: None,
            config: ContainerConfig::default(),
        }
    }

    /// Bracket stops with terminating/terminated events
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Use a custom configuration
    #[must_use]
    pub fn with_config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Engine binary in use
    #[must_use]
    pub fn engine(&self) -> &str {
        &self.config.engine
    }

    async fn engine_call(&self, args: &[&str]) -> EngineOutcome {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        debug!(engine = %self.config.engine, args = ?args, "Container engine call");

        match self.runner.run(&self.config.engine, &args).await {
            Ok(output) if output.success => EngineOutcome {
                success: true,
                stdout: Some(output.stdout),
                stderr: Some(output.stderr),
                error: None,
            },
            Ok(output) => {
                let stderr = output.stderr.trim();
                let error = if stderr.is_empty() {
                    format!("{} {} failed", self.config.engine, args.join(" "))
                } else {
                    stderr.to_string()
                };
                EngineOutcome {
                    success: false,
                    error: Some(error),
                    stdout: Some(output.stdout),
                    stderr: Some(output.stderr),
                }
            }
            Err(e) => EngineOutcome::failed(e.to_string()),
        }
    }

    fn notify(&self, event: BridgeEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event);
        }
    }

    /// Stop one container.
    #[instrument(skip(self))]
    pub async fn stop_one(&self, name: &str) -> EngineOutcome {
        self.notify(BridgeEvent::ContainerTerminating {
            name: name.to_string(),
        });
        let outcome = self.engine_call(&["stop", name]).await;
        if !outcome.success {
            warn!(error = ?outcome.error, "Container stop failed");
        }
        self.notify(BridgeEvent::ContainerTerminated {
            name: name.to_string(),
            success: outcome.success,
            error: outcome.error.clone(),
        });
        outcome
    }

    /// Remove one container.
    #[instrument(skip(self))]
    pub async fn remove_one(&self, name: &str) -> EngineOutcome {
        let outcome = self.engine_call(&["rm", name]).await;
        if !outcome.success {
            warn!(error = ?outcome.error, "Container removal failed");
        }
        outcome
    }

    /// List all containers, running or not.
    #[instrument(skip(self))]
    pub async fn list_containers(&self, format: ListFormat) -> ListOutcome {
        let template = match format {
            ListFormat::Names => "{{.Names}}",
            ListFormat::Json => "{{json .}}",
        };
        let outcome = self.engine_call(&["ps", "-a", "--format", template]).await;
        if !outcome.success {
            return ListOutcome::failed(outcome.error.unwrap_or_default());
        }
        let stdout = outcome.stdout.unwrap_or_default();
        match parse_listing(&stdout, format) {
            Some(containers) => ListOutcome {
                success: true,
                containers: Some(containers),
                error: None,
            },
            None => ListOutcome::failed(PARSE_ERROR),
        }
    }

    /// Whether the engine binary responds at all
    pub async fn is_available(&self) -> bool {
        self.engine_call(&["--version"]).await.success
    }

    /// Lowercase engine status of `name`, or `unknown`
    #[instrument(skip(self))]
    pub async fn status(&self, name: &str) -> String {
        let outcome = self
            .engine_call(&["inspect", "-f", "{{.State.Status}}", name])
            .await;
        match outcome.stdout {
            Some(stdout) if outcome.success && !stdout.trim().is_empty() => {
                stdout.trim().to_lowercase()
            }
            _ => "unknown".to_string(),
        }
    }
}

/// Parse engine listing output; `None` when a JSON line is malformed.
fn parse_listing(stdout: &str, format: ListFormat) -> Option<ContainerList> {
    let lines = stdout.lines().map(str::trim).filter(|line| !line.is_empty());
    match format {
        ListFormat::Names => Some(ContainerList::Names(lines.map(String::from).collect())),
        ListFormat::Json => lines
            .map(|line| serde_json::from_str(line).ok())
            .collect::<Option<Vec<serde_json::Value>>>()
            .map(ContainerList::Records),
    }
}
