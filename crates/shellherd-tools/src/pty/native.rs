//! Native PTY backend built on `pty-process`

use super::probe::{self, CompletionDetector};
use super::{Lifecycle, LiveSession, PtyInput, SessionFlags};
use crate::error::{Error, Result};
use crate::events::{BridgeEvent, Notifier, OutputStream, SessionId};
use dashmap::DashMap;
use pty_process::{OwnedReadPty, OwnedWritePty, Pts, Pty, Size};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Allocate a PTY pair sized to the requested terminal.
pub(super) fn allocate(cols: u16, rows: u16) -> Result<(Pty, Pts)> {
    let (pty, pts) =
        pty_process::open().map_err(|e| Error::Pty(format!("Failed to open PTY: {e}")))?;
    pty.resize(Size::new(rows, cols))
        .map_err(|e| Error::Pty(format!("Failed to size PTY: {e}")))?;
    Ok((pty, pts))
}

/// Start the interactive shell on the PTY's slave side.
pub(super) fn spawn_shell(shell: &str, cwd: Option<&Path>, pts: Pts) -> Result<Child> {
    // Builder pattern: each method consumes self
    let mut cmd = pty_process::Command::new(shell).env("TERM", "xterm-256color");
    if let Some(dir) = cwd {
        cmd = cmd.current_dir(dir);
    }
    cmd.spawn(pts)
        .map_err(|e| Error::Pty(format!("Failed to spawn {shell}: {e}")))
}

/// Write side of a terminal.
pub(super) trait TerminalWriter: AsyncWrite + Unpin {
    fn resize_terminal(&self, cols: u16, rows: u16) -> std::result::Result<(), String>;
}

impl TerminalWriter for OwnedWritePty {
    fn resize_terminal(&self, cols: u16, rows: u16) -> std::result::Result<(), String> {
        self.resize(Size::new(rows, cols)).map_err(|e| e.to_string())
    }
}

/// Apply queued input and resizes in order until every sender is gone or
/// the terminal stops accepting writes.
pub(super) async fn pump_input<W: TerminalWriter>(mut writer: W, mut input: UnboundedReceiver<PtyInput>) {
    while let Some(next) = input.recv().await {
        match next {
            PtyInput::Data(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!(error = %e, "PTY write failed; input closed");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    debug!(error = %e, "PTY flush failed; input closed");
                    break;
                }
            }
            PtyInput::Resize { cols, rows } => {
                if let Err(e) = writer.resize_terminal(cols, rows) {
                    debug!(error = %e, "PTY resize failed");
                }
            }
        }
    }
}

/// Forward terminal output as events and watch for the completion marker.
pub(super) async fn pump_output(
    mut reader: OwnedReadPty,
    session_id: SessionId,
    tag: String,
    flags: Arc<SessionFlags>,
    notifier: Arc<dyn Notifier>,
) {
    let mut buf = [0u8; 4096];
    let mut pending = Vec::new();
    let mut detector = CompletionDetector::new(tag);

    loop {
        // EIO once the shell exits is the normal end of a PTY
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);
        let text = probe::take_utf8(&mut pending);
        if text.is_empty() {
            continue;
        }

        let code = detector.feed(&text);
        notifier.notify(BridgeEvent::PtyOutput {
            session_id: session_id.clone(),
            output: text,
            stream: OutputStream::Stdout,
        });
        if let Some(code) = code {
            if probe::report_completion(&session_id, code, &flags, notifier.as_ref()) {
                info!(session_id = %session_id, exit_code = code, "Command completion detected");
            }
        }
    }

    if !pending.is_empty() {
        notifier.notify(BridgeEvent::PtyOutput {
            session_id,
            output: String::from_utf8_lossy(&pending).into_owned(),
            stream: OutputStream::Stdout,
        });
    }
}

/// Own the child until it exits or the session is killed, then clear the
/// bookkeeping for this spawn generation and report the exit. `exited` is
/// cancelled only after `process-ended` was published.
pub(super) async fn wait_for_exit(
    mut child: Child,
    session_id: SessionId,
    generation: u64,
    lifecycle: Lifecycle,
    sessions: Arc<DashMap<SessionId, LiveSession>>,
    notifier: Arc<dyn Notifier>,
) {
    let Lifecycle {
        kill,
        exited,
        flags,
    } = lifecycle;
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    flags.ended.store(true, Ordering::SeqCst);
    sessions.remove_if(&session_id, |_, live| live.generation == generation);

    let (code, signal) = match status {
        Ok(status) => (status.code(), status.signal()),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to reap session process");
            (None, None)
        }
    };
    info!(session_id = %session_id, code = ?code, signal = ?signal, "PTY session ended");
    notifier.notify(BridgeEvent::ProcessEnded {
        session_id,
        code,
        signal,
    });
    exited.cancel();
}
