//! Process tree inspection and termination
//!
//! Discovers every descendant of a root pid from a single platform listing
//! and terminates trees deepest-first. The platform specifics live behind
//! [`ProcessPlatform`]; [`native_platform`] picks the implementation for
//! the host at startup.

mod parse;

pub use parse::{descendants_of, parse_ps_output, parse_wmic_csv};

use crate::error::{Error, Result};
use crate::runner::{CommandRunner, TokioCommandRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One OS process from a platform listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// Process id
    pub pid: u32,
    /// Parent process id
    pub parent_pid: u32,
    /// Full command line
    pub command: String,
    /// Image name (Windows listings only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Login session (Windows listings only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
}

/// Platform-specific process listing and termination.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessPlatform: Send + Sync {
    /// Snapshot of every process on the host
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>>;

    /// Forcefully terminate one process
    async fn terminate(&self, pid: u32) -> Result<()>;
}

/// `ps` / `kill` based platform for Linux and macOS.
pub struct PosixPlatform {
    runner: Arc<dyn CommandRunner>,
}

impl PosixPlatform {
    /// Create a POSIX platform on top of a command runner
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ProcessPlatform for PosixPlatform {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let args = ["-A", "-o", "pid=,ppid=,args="].map(String::from);
        let output = self.runner.run("ps", &args).await?;
        if !output.success {
            return Err(Error::Execution(format!(
                "ps failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_ps_output(&output.stdout))
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        let args = ["-s".to_string(), "KILL".to_string(), pid.to_string()];
        let output = self.runner.run("kill", &args).await?;
        // Exiting between listing and signalling is not a failure.
        if output.success || output.stderr.contains("No such process") {
            return Ok(());
        }
        Err(Error::Execution(output.stderr.trim().to_string()))
    }
}

/// `wmic` / `taskkill` based platform for Windows.
pub struct WindowsPlatform {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsPlatform {
    /// Create a Windows platform on top of a command runner
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ProcessPlatform for WindowsPlatform {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let args = [
            "process",
            "get",
            "CommandLine,Name,ParentProcessId,ProcessId,SessionId",
            "/format:csv",
        ]
        .map(String::from);
        let output = self.runner.run("wmic", &args).await?;
        if !output.success {
            return Err(Error::Execution(format!(
                "wmic failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_wmic_csv(&output.stdout))
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        let args = ["/PID".to_string(), pid.to_string(), "/T".into(), "/F".into()];
        let output = self.runner.run("taskkill", &args).await?;
        if output.success {
            return Ok(());
        }
        Err(Error::Execution(output.stderr.trim().to_string()))
    }
}

/// Platform implementation for the host OS.
#[must_use]
pub fn native_platform(runner: Arc<dyn CommandRunner>) -> Arc<dyn ProcessPlatform> {
    if cfg!(windows) {
        Arc::new(WindowsPlatform::new(runner))
    } else {
        Arc::new(PosixPlatform::new(runner))
    }
}

/// Descendant discovery and tree termination.
#[derive(Clone)]
pub struct ProcessTree {
    platform: Arc<dyn ProcessPlatform>,
}

impl ProcessTree {
    /// Create a process tree over the given platform
    #[must_use]
    pub fn new(platform: Arc<dyn ProcessPlatform>) -> Self {
        Self { platform }
    }

    /// Process tree for the host OS using `tokio::process`
    #[must_use]
    pub fn native() -> Self {
        Self::new(native_platform(Arc::new(TokioCommandRunner)))
    }

    /// Every descendant of `root`, parents before children.
    ///
    /// Never fails: a listing failure is logged and yields an empty list.
    pub async fn child_processes(&self, root: u32) -> Vec<ProcessInfo> {
        match self.platform.list_processes().await {
            Ok(all) => descendants_of(&all, root),
            Err(e) => {
                warn!(root_pid = root, error = %e, "Process listing failed");
                Vec::new()
            }
        }
    }

    /// Terminate `root` and all of its descendants, deepest first.
    ///
    /// Every process is attempted even when an earlier one fails; the first
    /// failure is returned.
    #[instrument(skip(self))]
    pub async fn terminate_tree(&self, root: u32) -> Result<()> {
        let descendants = self.child_processes(root).await;
        debug!(count = descendants.len(), "Terminating descendants");

        let mut first_error = None;
        for pid in descendants.iter().rev().map(|p| p.pid).chain([root]) {
            if let Err(e) = self.platform.terminate(pid).await {
                warn!(pid, error = %e, "Failed to terminate process");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
