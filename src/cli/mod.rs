//! CLI module for Shellherd
//!
//! Provides commands:
//! - `run`: run one command in a supervised PTY session
//! - `containers`: container lifecycle operations
//! - `fix`: execute a prioritized remediation plan
//! - `processes`: list the descendants of a process

use crate::config::AppConfig;
use crate::runtime::Runtime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

pub mod containers;
pub mod fix;
pub mod processes;
pub mod run;

/// Shellherd CLI
#[derive(Parser, Debug)]
#[command(name = "shellherd")]
#[command(about = "Supervise shell sessions, process trees and containers")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Extra configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command in a PTY session
    Run(run::RunArgs),
    /// Container lifecycle operations
    Containers {
        #[command(subcommand)]
        action: containers::ContainerAction,
    },
    /// Execute a remediation plan
    Fix(fix::FixArgs),
    /// List the descendants of a process
    Processes {
        /// Root process id
        pid: u32,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<ExitCode> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(ExitCode::SUCCESS);
    };

    let runtime = Runtime::new(&config);
    let result = match command {
        Commands::Run(args) => run::run(args, &runtime).await,
        Commands::Containers { action } => containers::run(action, &runtime.containers).await,
        Commands::Fix(args) => fix::run(args, &runtime).await,
        Commands::Processes { pid } => processes::run(pid, &runtime.tree).await,
    };
    runtime.shutdown().await;
    result
}
