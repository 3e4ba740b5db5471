//! PTY session management
//!
//! One interactive shell per session id, each supervised by its own tasks:
//! an input pump, an output pump with completion detection, an exit waiter
//! and the completion probe. The session map is the only shared state and
//! spawn claims its slot under the map's entry lock.

#[cfg(all(unix, feature = "pty"))]
mod native;
#[cfg_attr(not(all(unix, feature = "pty")), allow(dead_code))]
mod probe;

use crate::error::{Error, Result};
use crate::events::{BridgeEvent, Notifier, OutputStream, ProcessState, SessionId, SessionStatus, Severity};
use crate::process_tree::ProcessTree;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Upper bound on how long `kill` waits for the exit watcher.
const EXIT_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// PTY session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// Shell to run; falls back to `$SHELL`, then `/bin/bash`
    pub shell: Option<String>,
    /// Whether the completion probe runs at all
    pub probe_enabled: bool,
    /// Delay before the first probe
    pub probe_initial_delay_ms: u64,
    /// Delay between the first and second probe
    pub probe_followup_delay_ms: u64,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            shell: None,
            probe_enabled: true,
            probe_initial_delay_ms: 1000,
            probe_followup_delay_ms: 1500,
        }
    }
}

impl PtyConfig {
    /// Resolved shell path
    #[must_use]
    pub fn shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/bash".to_string())
    }

    fn probe_delays(&self) -> [Duration; 2] {
        [
            Duration::from_millis(self.probe_initial_delay_ms),
            Duration::from_millis(self.probe_followup_delay_ms),
        ]
    }
}

/// Parameters for starting a session.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Session to start
    pub session_id: SessionId,
    /// Command line typed into the shell
    pub command: String,
    /// Terminal columns
    pub cols: u16,
    /// Terminal rows
    pub rows: u16,
    /// Working directory of the shell
    pub cwd: Option<PathBuf>,
    /// Make the shell exit with the command's status instead of probing
    pub exit_when_done: bool,
}

impl SpawnRequest {
    /// 80x24 session running `command` in the current directory
    #[must_use]
    pub fn new(session_id: impl Into<SessionId>, command: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            command: command.into(),
            cols: 80,
            rows: 24,
            cwd: None,
            exit_when_done: false,
        }
    }

    /// Set the terminal size
    #[must_use]
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Exit the shell once the command finishes
    #[must_use]
    pub fn with_exit_when_done(mut self, exit: bool) -> Self {
        self.exit_when_done = exit;
        self
    }

    fn input_line(&self) -> String {
        if self.exit_when_done {
            format!("{}; exit $?\r", self.command)
        } else {
            format!("{}\r", self.command)
        }
    }
}

/// Result of a spawn that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// Shell is running under a PTY
    Started {
        /// Shell pid
        pid: Option<u32>,
    },
    /// No PTY on this host; an explanatory output line was emitted
    Unavailable,
}

/// Result of a kill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillOutcome {
    /// Whether every process was signalled
    pub success: bool,
    /// First failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KillOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }
}

pub(crate) enum PtyInput {
    Data(Vec<u8>),
    Resize { cols: u16, rows: u16 },
}

#[derive(Default)]
pub(crate) struct SessionFlags {
    manual_input: AtomicBool,
    completed: AtomicBool,
    ended: AtomicBool,
}

impl SessionFlags {
    fn probe_blocked(&self) -> bool {
        self.manual_input.load(Ordering::SeqCst)
            || self.completed.load(Ordering::SeqCst)
            || self.ended.load(Ordering::SeqCst)
    }
}

/// Signals shared by a session's map entry and its background tasks.
#[derive(Clone, Default)]
pub(crate) struct Lifecycle {
    kill: CancellationToken,
    exited: CancellationToken,
    flags: Arc<SessionFlags>,
}

impl Lifecycle {
    /// Mark a session that never got a process as finished.
    fn abandon(&self) {
        self.flags.ended.store(true, Ordering::SeqCst);
        self.exited.cancel();
    }
}

pub(crate) struct LiveSession {
    generation: u64,
    pid: Option<u32>,
    command: String,
    input: UnboundedSender<PtyInput>,
    lifecycle: Lifecycle,
}

/// A claimed session slot whose shell is not running yet.
#[cfg_attr(not(all(unix, feature = "pty")), allow(dead_code))]
struct Reservation {
    generation: u64,
    input: UnboundedSender<PtyInput>,
    input_rx: UnboundedReceiver<PtyInput>,
    lifecycle: Lifecycle,
}

/// Owns every live PTY session.
pub struct PtyManager {
    sessions: Arc<DashMap<SessionId, LiveSession>>,
    notifier: Arc<dyn Notifier>,
    tree: ProcessTree,
    config: PtyConfig,
    generation: AtomicU64,
}

impl PtyManager {
    /// Create a manager publishing to `notifier`
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, tree: ProcessTree) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            notifier,
            tree,
            config: PtyConfig::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// Use a custom configuration
    #[must_use]
    pub fn with_config(mut self, config: PtyConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether this build can allocate PTYs at all
    #[must_use]
    pub fn is_supported() -> bool {
        cfg!(all(unix, feature = "pty"))
    }

    /// Start `request.command` in a fresh shell.
    ///
    /// Emits `session-spawn`, then `process-started` once the shell runs.
    /// Rejects the request with [`Error::SessionConflict`] (and a warning
    /// notification) when the id already has a live process; the existing
    /// process is left untouched.
    pub fn spawn(&self, request: SpawnRequest) -> Result<SpawnOutcome> {
        let session_id = request.session_id.clone();
        let Some(reservation) = self.reserve(&request) else {
            let pid = self.pid(&session_id);
            warn!(session_id = %session_id, pid = ?pid, "Spawn rejected: session already has a live process");
            self.notifier.notify(BridgeEvent::notification(
                format!("Session {session_id} is already running a process"),
                Severity::Warning,
            ));
            return Err(Error::SessionConflict(session_id.to_string()));
        };

        self.notifier.notify(BridgeEvent::SessionSpawn {
            session_id,
            command: request.command.clone(),
            cols: request.cols,
            rows: request.rows,
        });
        self.launch(reservation, request)
    }

    /// Claim the id under the map's entry lock. The command line is queued
    /// before the slot becomes visible so it is always the first input.
    fn reserve(&self, request: &SpawnRequest) -> Option<Reservation> {
        let Entry::Vacant(slot) = self.sessions.entry(request.session_id.clone()) else {
            return None;
        };
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (input, input_rx) = tokio::sync::mpsc::unbounded_channel();
        let _ = input.send(PtyInput::Data(request.input_line().into_bytes()));
        let lifecycle = Lifecycle::default();

        slot.insert(LiveSession {
            generation,
            pid: None,
            command: request.command.clone(),
            input: input.clone(),
            lifecycle: lifecycle.clone(),
        });
        Some(Reservation {
            generation,
            input,
            input_rx,
            lifecycle,
        })
    }

    /// Give a reserved slot back when no process was started.
    fn release(&self, session_id: &SessionId, reservation: &Reservation) {
        self.sessions
            .remove_if(session_id, |_, live| live.generation == reservation.generation);
        reservation.lifecycle.abandon();
    }

    #[cfg(all(unix, feature = "pty"))]
    fn launch(&self, reservation: Reservation, request: SpawnRequest) -> Result<SpawnOutcome> {
        let session_id = request.session_id.clone();
        let (pty, pts) = match native::allocate(request.cols, request.rows) {
            Ok(pair) => pair,
            Err(e) => {
                self.release(&session_id, &reservation);
                return Ok(self.unavailable(&session_id, &e.to_string()));
            }
        };
        let child = match native::spawn_shell(&self.config.shell(), request.cwd.as_deref(), pts) {
            Ok(child) => child,
            Err(e) => {
                self.release(&session_id, &reservation);
                return Err(e);
            }
        };
        let (reader, writer) = pty.into_split();

        let pid = child.id();
        if let Some(mut live) = self.sessions.get_mut(&session_id) {
            if live.generation == reservation.generation {
                live.pid = pid;
            }
        }
        let Reservation {
            generation,
            input,
            input_rx,
            lifecycle,
        } = reservation;
        let tag = probe::new_tag();

        info!(session_id = %session_id, pid = ?pid, command = %request.command, "PTY session started");
        self.notifier.notify(BridgeEvent::ProcessStarted {
            session_id: session_id.clone(),
            pid,
        });

        tokio::spawn(native::pump_input(writer, input_rx));
        tokio::spawn(native::pump_output(
            reader,
            session_id.clone(),
            tag.clone(),
            lifecycle.flags.clone(),
            self.notifier.clone(),
        ));
        if self.config.probe_enabled && !request.exit_when_done {
            tokio::spawn(probe::run_probes(
                session_id.clone(),
                input,
                lifecycle.flags.clone(),
                tag,
                self.config.probe_delays(),
            ));
        }
        tokio::spawn(native::wait_for_exit(
            child,
            session_id,
            generation,
            lifecycle,
            self.sessions.clone(),
            self.notifier.clone(),
        ));

        Ok(SpawnOutcome::Started { pid })
    }

    #[cfg(not(all(unix, feature = "pty")))]
    fn launch(&self, reservation: Reservation, request: SpawnRequest) -> Result<SpawnOutcome> {
        self.release(&request.session_id, &reservation);
        Ok(self.unavailable(&request.session_id, "not supported on this platform"))
    }

    fn unavailable(&self, session_id: &SessionId, reason: &str) -> SpawnOutcome {
        info!(session_id = %session_id, reason, "PTY support unavailable");
        self.notifier.notify(BridgeEvent::PtyOutput {
            session_id: session_id.clone(),
            output: format!("PTY support is unavailable ({reason}); the command was not started.\r\n"),
            stream: OutputStream::Stdout,
        });
        SpawnOutcome::Unavailable
    }

    /// Type `data` into the session. Disables the completion probe.
    ///
    /// Silently ignored when the session is not live.
    pub fn write(&self, session_id: &SessionId, data: &str) {
        match self.sessions.get(session_id) {
            Some(session) => {
                session.lifecycle.flags.manual_input.store(true, Ordering::SeqCst);
                let _ = session.input.send(PtyInput::Data(data.as_bytes().to_vec()));
            }
            None => debug!(session_id = %session_id, "Write to unknown session ignored"),
        }
    }

    /// Resize the session's terminal. Silently ignored when not live.
    pub fn resize(&self, session_id: &SessionId, cols: u16, rows: u16) {
        match self.sessions.get(session_id) {
            Some(session) => {
                let _ = session.input.send(PtyInput::Resize { cols, rows });
            }
            None => debug!(session_id = %session_id, "Resize of unknown session ignored"),
        }
    }

    /// Kill the session's shell and every descendant, deepest first.
    ///
    /// Emits `process-terminating` before and `process-terminated` after.
    /// Returns once the session's `process-ended` was published, so the id
    /// can be spawned again right away. Bookkeeping is always cleared. An
    /// unknown id is a successful no-op.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn kill(&self, session_id: &SessionId) -> KillOutcome {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            debug!("Kill requested for unknown session");
            return KillOutcome::ok();
        };
        let lifecycle = &session.lifecycle;
        lifecycle.flags.ended.store(true, Ordering::SeqCst);

        let name = session_id.to_string();
        self.notifier
            .notify(BridgeEvent::ProcessTerminating { name: name.clone() });

        let result = match session.pid {
            Some(pid) => self.tree.terminate_tree(pid).await,
            None => Ok(()),
        };
        lifecycle.kill.cancel();
        if tokio::time::timeout(EXIT_REPORT_TIMEOUT, lifecycle.exited.cancelled())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = EXIT_REPORT_TIMEOUT.as_millis() as u64,
                "Killed session did not report its exit in time"
            );
        }

        let outcome = match result {
            Ok(()) => KillOutcome::ok(),
            Err(e) => {
                warn!(error = %e, "Session kill incomplete");
                KillOutcome {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };
        info!(command = %session.command, success = outcome.success, "Session killed");
        self.notifier.notify(BridgeEvent::ProcessTerminated {
            name,
            success: outcome.success,
            error: outcome.error.clone(),
        });
        outcome
    }

    /// Kill every live session. Never fails.
    pub async fn kill_all(&self) {
        let ids = self.session_ids();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Killing all sessions");
        join_all(ids.iter().map(|id| self.kill(id))).await;
    }

    /// Publish a `command-status-update` describing the processes running
    /// under the session's shell. Returns the reported status, or `None`
    /// when the session is not live.
    pub async fn report_status(&self, session_id: &SessionId) -> Option<SessionStatus> {
        let pid = self.sessions.get(session_id)?.pid?;
        let children = self.tree.child_processes(pid).await;

        let (status, description) = match children.len() {
            0 => (SessionStatus::Running, "Idle".to_string()),
            1 => (SessionStatus::Processing, "1 process running".to_string()),
            n => (SessionStatus::Processing, format!("{n} processes running")),
        };
        let process_states: Vec<ProcessState> = children
            .into_iter()
            .map(|p| ProcessState {
                pid: p.pid,
                command: p.command,
                state: "running".to_string(),
            })
            .collect();

        self.notifier.notify(BridgeEvent::CommandStatusUpdate {
            session_id: session_id.clone(),
            overall_status: status,
            status_description: description,
            process_count: process_states.len(),
            process_states,
        });
        Some(status)
    }

    /// Shell pid of a live session
    #[must_use]
    pub fn pid(&self, session_id: &SessionId) -> Option<u32> {
        self.sessions.get(session_id).and_then(|s| s.pid)
    }

    /// Whether the session has a live process
    #[must_use]
    pub fn is_alive(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Ids of all live sessions
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests;
