//! `shellherd containers`: engine lifecycle operations

use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use serde::Serialize;
use shellherd_tools::{BulkOperation, ContainerManager, ListFormat};
use std::process::ExitCode;

#[derive(Subcommand, Debug)]
pub enum ContainerAction {
    /// Stop containers
    Stop {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove containers
    Rm {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List all containers
    Ls {
        /// Print full JSON records instead of names
        #[arg(long)]
        json: bool,
    },
    /// Print the status of a container
    Status {
        /// Container name
        name: String,
    },
    /// Check that the engine is installed
    Available,
    /// Apply a bulk operation to a JSON payload
    Bulk {
        /// Operation to apply
        #[arg(value_enum)]
        operation: BulkKind,
        /// JSON array of names, or an object with a `names` array
        payload: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum BulkKind {
    Stop,
    Rm,
}

impl From<BulkKind> for BulkOperation {
    fn from(kind: BulkKind) -> Self {
        match kind {
            BulkKind::Stop => Self::Stop,
            BulkKind::Rm => Self::Remove,
        }
    }
}

pub async fn run(action: ContainerAction, manager: &ContainerManager) -> anyhow::Result<ExitCode> {
    match action {
        ContainerAction::Stop { names } => {
            let result = manager.stop_many(&names).await;
            print_json(&result, result.success)
        }
        ContainerAction::Rm { names } => {
            let result = manager.remove_many(&names).await;
            print_json(&result, result.success)
        }
        ContainerAction::Ls { json } => {
            let format = if json { ListFormat::Json } else { ListFormat::Names };
            let listing = manager.list_containers(format).await;
            print_json(&listing, listing.success)
        }
        ContainerAction::Status { name } => {
            println!("{}", manager.status(&name).await);
            Ok(ExitCode::SUCCESS)
        }
        ContainerAction::Available => {
            let available = manager.is_available().await;
            println!(
                "{} is {}",
                manager.engine(),
                if available { "available" } else { "not available" }
            );
            Ok(if available { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        ContainerAction::Bulk { operation, payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Bulk payload is not valid JSON")?;
            let result = manager.handle_bulk(operation.into(), &payload).await;
            print_json(&result, result.success)
        }
    }
}

fn print_json(value: &impl Serialize, success: bool) -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
