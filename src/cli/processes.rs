//! `shellherd processes`: descendants of a process

use shellherd_tools::ProcessTree;
use std::process::ExitCode;

pub async fn run(pid: u32, tree: &ProcessTree) -> anyhow::Result<ExitCode> {
    let children = tree.child_processes(pid).await;
    if children.is_empty() {
        println!("No child processes of {pid}");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:>8} {:>8}  COMMAND", "PID", "PPID");
    for child in children {
        println!("{:>8} {:>8}  {}", child.pid, child.parent_pid, child.command);
    }
    Ok(ExitCode::SUCCESS)
}
