//! `shellherd fix`: run a prioritized remediation plan
//!
//! Plans are TOML files with one `[[fix]]` table per command:
//!
//! ```toml
//! [[fix]]
//! id = "deps"
//! title = "Install dependencies"
//! command = "npm install"
//! priority = 0
//! ```

use crate::runtime::Runtime;
use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use shellherd_core::{FixCommand, RunSnapshot, RunStatus};
use shellherd_tools::{BridgeEvent, Severity};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct FixArgs {
    /// Plan file
    pub plan: PathBuf,

    /// Run only the group with this priority
    #[arg(long)]
    pub group: Option<u32>,

    /// Echo session output while commands run
    #[arg(long)]
    pub show_output: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Plan {
    #[serde(rename = "fix", default)]
    pub fixes: Vec<FixCommand>,
}

pub(crate) fn parse_plan(text: &str) -> anyhow::Result<Plan> {
    toml::from_str(text).context("Invalid fix plan")
}

fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    parse_plan(&text)
}

pub async fn run(args: FixArgs, runtime: &Runtime) -> anyhow::Result<ExitCode> {
    let plan = load_plan(&args.plan)?;
    let orchestrator = &runtime.orchestrator;

    let mut events = runtime.bus.subscribe();
    let opened = orchestrator.open(plan.fixes).await?;
    info!(groups = opened.groups.len(), "Plan opened");

    match args.group {
        Some(priority) => orchestrator.start_group(priority).await?,
        None => orchestrator.start_all().await?,
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    BridgeEvent::FixCommandStatus { command_id, status } => {
                        println!("{command_id}: {status}");
                    }
                    BridgeEvent::FixRunStatus { status } => {
                        println!("run: {status}");
                        if matches!(status.as_str(), "success" | "failed" | "stopped") {
                            break;
                        }
                    }
                    BridgeEvent::Notification { message, severity } => match severity {
                        Severity::Info => info!("{message}"),
                        Severity::Warning | Severity::Error => warn!("{message}"),
                    },
                    BridgeEvent::PtyOutput { session_id, output, .. } if args.show_output => {
                        for line in output.lines().filter(|l| !l.trim().is_empty()) {
                            println!("[{session_id}] {line}");
                        }
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping all commands");
                orchestrator.stop_all().await?;
            }
        }
    }

    let snapshot = orchestrator.snapshot().await;
    print_summary(&snapshot);
    Ok(if snapshot.status == RunStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(snapshot: &RunSnapshot) {
    println!();
    for group in &snapshot.groups {
        println!("priority {}", group.priority);
        for command in &group.commands {
            match &command.detail {
                Some(detail) => println!(
                    "  {:<10} {} ({detail})",
                    command.status.as_str(),
                    command.fix.title
                ),
                None => println!("  {:<10} {}", command.status.as_str(), command.fix.title),
            }
        }
    }
    println!("result: {}", snapshot.status);
}
