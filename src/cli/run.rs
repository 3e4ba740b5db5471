//! `shellherd run`: one command in a supervised PTY session

use crate::runtime::Runtime;
use anyhow::{bail, Context};
use clap::Args;
use shellherd_tools::{BridgeEvent, SessionId, SpawnOutcome, SpawnRequest};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Command line to execute
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,

    /// Session id
    #[arg(long, default_value = "cli")]
    pub session: String,

    /// Working directory
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Terminal columns
    #[arg(long, default_value_t = 120)]
    pub cols: u16,

    /// Terminal rows
    #[arg(long, default_value_t = 40)]
    pub rows: u16,
}

pub async fn run(args: RunArgs, runtime: &Runtime) -> anyhow::Result<ExitCode> {
    let session_id = SessionId::from(args.session);
    let command = args.command.join(" ");

    let mut events = runtime.bus.subscribe_session(&session_id);
    let mut changes = runtime.store.changes();

    let mut request = SpawnRequest::new(session_id.clone(), command.as_str())
        .with_size(args.cols, args.rows)
        .with_exit_when_done(true);
    if let Some(cwd) = args.cwd {
        request = request.with_cwd(cwd);
    }

    match runtime.pty.spawn(request).context("Failed to start session")? {
        SpawnOutcome::Started { pid } => info!(session = %session_id, ?pid, "Session started"),
        SpawnOutcome::Unavailable => bail!("PTY sessions are not supported on this platform"),
    }

    let mut stdout = std::io::stdout();
    let record = loop {
        tokio::select! {
            Some(event) = events.recv() => print_output(&mut stdout, &event)?,
            change = changes.recv() => {
                let Ok(record) = change else { continue };
                if record.id == session_id && record.status.is_terminal() {
                    while let Some(event) = events.try_recv() {
                        print_output(&mut stdout, &event)?;
                    }
                    break record;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(session = %session_id, "Interrupted, stopping session");
                runtime.pty.kill(&session_id).await;
            }
        }
    };

    eprintln!(
        "[{}] {}",
        record.status,
        record.exit_status.as_deref().unwrap_or_default()
    );
    let code = record.exit_code.unwrap_or(1).clamp(0, 255);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn print_output(out: &mut impl Write, event: &BridgeEvent) -> std::io::Result<()> {
    if let BridgeEvent::PtyOutput { output, .. } = event {
        out.write_all(output.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}
