//! Auto-setup orchestrator
//!
//! Runs remediation commands one priority group at a time. Each command
//! gets its own PTY session under a synthetic id and a timeout timer; the
//! session store reports completion back through [`AutoSetupOrchestrator::on_session_change`].
//!
//! A timed-out command is only marked as such. Its session keeps running
//! so the user can inspect it or terminate it explicitly. Sessions left
//! over from an earlier run are killed when their commands start again.

use super::config::AutoSetupConfig;
use super::launcher::SessionLauncher;
use super::types::{CommandGroup, CommandState, FixCommand, FixStatus, RunSnapshot, RunStatus};
use crate::error::{Error, Result};
use crate::state::{SessionRecord, SessionStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use shellherd_tools::{BridgeEvent, Notifier, SessionId, SessionStatus, Severity};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prefix of the synthetic session ids used for fix commands.
pub const SESSION_PREFIX: &str = "autosetup-";

/// Session id a fix command runs under
#[must_use]
pub fn session_id_for(command_id: &str) -> SessionId {
    SessionId::new(format!("{SESSION_PREFIX}{command_id}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum RunMode {
    #[default]
    Sequential,
    SingleGroup,
}

#[derive(Default)]
struct RunState {
    status: RunStatus,
    mode: RunMode,
    groups: Vec<CommandGroup>,
    active_group: Option<u32>,
    timers: HashMap<String, CancellationToken>,
    launched_at: HashMap<String, DateTime<Utc>>,
}

impl RunState {
    fn group_index(&self, priority: u32) -> Option<usize> {
        self.groups.iter().position(|g| g.priority == priority)
    }

    fn command(&self, command_id: &str) -> Option<&CommandState> {
        self.groups
            .iter()
            .flat_map(|g| &g.commands)
            .find(|c| c.fix.id == command_id)
    }

    fn command_mut(&mut self, command_id: &str) -> Option<&mut CommandState> {
        self.groups
            .iter_mut()
            .flat_map(|g| &mut g.commands)
            .find(|c| c.fix.id == command_id)
    }

    fn cancel_timer(&mut self, command_id: &str) {
        if let Some(token) = self.timers.remove(command_id) {
            token.cancel();
        }
    }

    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            status: self.status,
            active_group: self.active_group,
            groups: self.groups.clone(),
        }
    }
}

struct Inner {
    launcher: Arc<dyn SessionLauncher>,
    notifier: Arc<dyn Notifier>,
    config: AutoSetupConfig,
    state: Mutex<RunState>,
}

/// Priority-grouped remediation runner.
#[derive(Clone)]
pub struct AutoSetupOrchestrator {
    inner: Arc<Inner>,
}

impl AutoSetupOrchestrator {
    /// Create an orchestrator that opens sessions through `launcher`
    #[must_use]
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        notifier: Arc<dyn Notifier>,
        config: AutoSetupConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                notifier,
                config,
                state: Mutex::new(RunState::default()),
            }),
        }
    }

    /// Group `fixes` by ascending priority with every command pending.
    /// Nothing is executed.
    pub async fn open(&self, fixes: Vec<FixCommand>) -> Result<RunSnapshot> {
        let mut seen = HashSet::new();
        for fix in &fixes {
            if fix.id.trim().is_empty() {
                return Err(Error::InvalidPlan("command id must not be empty".into()));
            }
            if !seen.insert(fix.id.as_str()) {
                return Err(Error::InvalidPlan(format!("duplicate command id: {}", fix.id)));
            }
        }

        let mut state = self.inner.state.lock().await;
        if state.status == RunStatus::Running {
            return Err(Error::RunInProgress);
        }
        for (_, token) in state.timers.drain() {
            token.cancel();
        }

        let mut grouped: BTreeMap<u32, Vec<CommandState>> = BTreeMap::new();
        for fix in fixes {
            grouped.entry(fix.priority).or_default().push(CommandState {
                fix,
                status: FixStatus::Pending,
                detail: None,
            });
        }
        state.groups = grouped
            .into_iter()
            .map(|(priority, commands)| CommandGroup { priority, commands })
            .collect();
        state.active_group = None;
        state.mode = RunMode::Sequential;

        info!(groups = state.groups.len(), "Remediation run opened");
        self.set_run_status(&mut state, RunStatus::Preparing);
        for command in state.groups.iter().flat_map(|g| &g.commands) {
            self.emit_command_status(&command.fix.id, command.status);
        }
        Ok(state.snapshot())
    }

    /// Run every group in priority order, starting with the lowest.
    pub async fn start_all(&self) -> Result<()> {
        let mut state = self.lock_startable().await?;
        for command in state.groups.iter_mut().flat_map(|g| &mut g.commands) {
            command.status = FixStatus::Pending;
            command.detail = None;
        }
        state.mode = RunMode::Sequential;
        let ids: Vec<String> = state
            .groups
            .iter()
            .flat_map(|g| &g.commands)
            .map(|c| c.fix.id.clone())
            .collect();
        self.reclaim_sessions(&ids).await;
        self.set_run_status(&mut state, RunStatus::Running);

        match state.groups.first().map(|g| g.priority) {
            Some(priority) => self.start_group_locked(&mut state, priority),
            None => self.finish(&mut state),
        }
        Ok(())
    }

    /// Run exactly the group with `priority`, regardless of sequence.
    pub async fn start_group(&self, priority: u32) -> Result<()> {
        let mut state = self.lock_startable().await?;
        let index = state
            .group_index(priority)
            .ok_or(Error::UnknownGroup(priority))?;
        for command in &mut state.groups[index].commands {
            command.status = FixStatus::Pending;
            command.detail = None;
        }
        state.mode = RunMode::SingleGroup;
        let ids: Vec<String> = state.groups[index]
            .commands
            .iter()
            .map(|c| c.fix.id.clone())
            .collect();
        self.reclaim_sessions(&ids).await;
        self.set_run_status(&mut state, RunStatus::Running);
        self.start_group_locked(&mut state, priority);
        Ok(())
    }

    /// Kill one command's session and mark it stopped.
    pub async fn terminate_command(&self, command_id: &str) -> Result<()> {
        let (session_id, title) = {
            let mut state = self.inner.state.lock().await;
            if state.status == RunStatus::Idle {
                return Err(Error::NotOpened);
            }
            let command = state
                .command(command_id)
                .ok_or_else(|| Error::UnknownCommand(command_id.to_string()))?;
            let title = command.fix.title.clone();
            let current = command.status;

            state.cancel_timer(command_id);
            if matches!(current, FixStatus::Running | FixStatus::Timeout) {
                self.set_command_status(&mut state, command_id, FixStatus::Stopped, Some("Stopped by user".into()));
            }
            (session_id_for(command_id), title)
        };

        let killed = self.inner.launcher.terminate(&session_id).await;
        let (message, severity) = if killed {
            (format!("Stopped \"{title}\""), Severity::Info)
        } else {
            (format!("Could not fully stop \"{title}\""), Severity::Warning)
        };
        self.inner
            .notifier
            .notify(BridgeEvent::notification(message, severity));

        let mut state = self.inner.state.lock().await;
        self.settle(&mut state);
        Ok(())
    }

    /// Terminate every running command and stop the run.
    pub async fn stop_all(&self) -> Result<()> {
        let targets: Vec<String> = {
            let mut state = self.inner.state.lock().await;
            if state.status == RunStatus::Idle {
                return Err(Error::NotOpened);
            }
            let targets: Vec<String> = state
                .groups
                .iter()
                .flat_map(|g| &g.commands)
                .filter(|c| matches!(c.status, FixStatus::Running | FixStatus::Timeout))
                .map(|c| c.fix.id.clone())
                .collect();
            for id in &targets {
                state.cancel_timer(id);
                self.set_command_status(&mut state, id, FixStatus::Stopped, Some("Stopped by user".into()));
            }
            self.set_run_status(&mut state, RunStatus::Stopped);
            targets
        };

        info!(count = targets.len(), "Stopping remediation run");
        join_all(
            targets
                .iter()
                .map(|id| async move { self.inner.launcher.terminate(&session_id_for(id)).await }),
        )
        .await;
        Ok(())
    }

    /// React to a changed session record.
    ///
    /// Only records of fix-command sessions that are still running matter;
    /// everything else is ignored.
    pub async fn on_session_change(&self, record: &SessionRecord) {
        let Some(command_id) = record.id.as_str().strip_prefix(SESSION_PREFIX) else {
            return;
        };
        let status = match record.status {
            SessionStatus::Done => FixStatus::Success,
            SessionStatus::Error => FixStatus::Failed,
            SessionStatus::Stopped => FixStatus::Stopped,
            SessionStatus::Timeout => FixStatus::Timeout,
            _ => return,
        };

        let mut state = self.inner.state.lock().await;
        match state.command(command_id) {
            Some(command) if command.status == FixStatus::Running => {}
            _ => return,
        }
        // A record from before the current launch belongs to an earlier run
        if state
            .launched_at
            .get(command_id)
            .is_some_and(|launched| record.spawned_at < *launched)
        {
            debug!(command_id, "Ignoring session change from an earlier run");
            return;
        }
        state.cancel_timer(command_id);
        debug!(command_id, status = %status, "Remediation command settled");
        self.set_command_status(&mut state, command_id, status, record.exit_status.clone());
        self.settle(&mut state);
    }

    /// Follow session changes from `store` until the returned task is
    /// aborted. Lagging resyncs from the store snapshots.
    pub fn attach(&self, store: &SessionStore) -> JoinHandle<()> {
        let this = self.clone();
        let store = store.clone();
        let mut changes = store.changes();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(record) => this.on_session_change(&record).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Orchestrator lagged behind session changes, resyncing");
                        for record in store.snapshots().await {
                            this.on_session_change(&record).await;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Current run state
    pub async fn snapshot(&self) -> RunSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    async fn lock_startable(&self) -> Result<MutexGuard<'_, RunState>> {
        let state = self.inner.state.lock().await;
        match state.status {
            RunStatus::Idle => Err(Error::NotOpened),
            RunStatus::Running => Err(Error::RunInProgress),
            _ => Ok(state),
        }
    }

    /// Kill sessions still alive from an earlier run of `command_ids`, so
    /// their ids can be launched again.
    async fn reclaim_sessions(&self, command_ids: &[String]) {
        let launcher = &self.inner.launcher;
        let stale: Vec<SessionId> = command_ids
            .iter()
            .map(|id| session_id_for(id))
            .filter(|session_id| launcher.is_active(session_id))
            .collect();
        if stale.is_empty() {
            return;
        }

        info!(count = stale.len(), "Stopping sessions left from an earlier run");
        let results = join_all(stale.iter().map(|session_id| async move {
            (session_id, launcher.terminate(session_id).await)
        }))
        .await;
        for (session_id, stopped) in results {
            if !stopped {
                warn!(session_id = %session_id, "Earlier session did not stop cleanly");
            }
        }
    }

    fn start_group_locked(&self, state: &mut RunState, priority: u32) {
        state.active_group = Some(priority);
        let Some(index) = state.group_index(priority) else {
            return;
        };
        let commands: Vec<(String, String, String)> = state.groups[index]
            .commands
            .iter()
            .map(|c| (c.fix.id.clone(), c.fix.title.clone(), c.fix.fix_command.clone()))
            .collect();
        info!(priority, count = commands.len(), "Starting remediation group");

        for (id, title, command) in commands {
            state.launched_at.insert(id.clone(), Utc::now());
            match self.inner.launcher.launch(&session_id_for(&id), &command) {
                Ok(()) => {
                    self.set_command_status(state, &id, FixStatus::Running, None);
                    self.arm_timeout(state, &id);
                }
                Err(e) => {
                    warn!(command_id = %id, error = %e, "Remediation command failed to start");
                    self.set_command_status(state, &id, FixStatus::Failed, Some(e.to_string()));
                    self.inner.notifier.notify(BridgeEvent::notification(
                        format!("Could not start \"{title}\": {e}"),
                        Severity::Error,
                    ));
                }
            }
        }
        self.settle(state);
    }

    fn arm_timeout(&self, state: &mut RunState, command_id: &str) {
        let token = CancellationToken::new();
        if let Some(previous) = state.timers.insert(command_id.to_string(), token.clone()) {
            previous.cancel();
        }

        let this = self.clone();
        let command_id = command_id.to_string();
        let timeout = self.inner.config.command_timeout();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => this.on_timeout(&command_id, &token).await,
            }
        });
    }

    async fn on_timeout(&self, command_id: &str, token: &CancellationToken) {
        let mut state = self.inner.state.lock().await;
        // Cancelled while waiting for the lock
        if token.is_cancelled() {
            return;
        }
        state.timers.remove(command_id);
        let title = match state.command(command_id) {
            Some(command) if command.status == FixStatus::Running => command.fix.title.clone(),
            _ => return,
        };

        let secs = self.inner.config.command_timeout_secs;
        warn!(command_id, timeout_secs = secs, "Remediation command timed out");
        self.set_command_status(
            &mut state,
            command_id,
            FixStatus::Timeout,
            Some(format!("Timed out after {secs} seconds")),
        );
        self.inner.notifier.notify(BridgeEvent::notification(
            format!("\"{title}\" did not finish within {secs} seconds"),
            Severity::Warning,
        ));
        self.settle(&mut state);
    }

    /// Advance or finish once the active group has settled.
    fn settle(&self, state: &mut RunState) {
        if state.status != RunStatus::Running {
            return;
        }
        let Some(index) = state.active_group.and_then(|p| state.group_index(p)) else {
            return;
        };
        let group = &state.groups[index];
        if !group.is_settled() {
            return;
        }

        let advance = state.mode == RunMode::Sequential
            && (group.all_succeeded() || self.inner.config.continue_on_failure);
        match state.groups.get(index + 1).map(|g| g.priority) {
            Some(next) if advance => self.start_group_locked(state, next),
            _ => self.finish(state),
        }
    }

    fn finish(&self, state: &mut RunState) {
        let succeeded = match (state.mode, state.active_group) {
            (RunMode::SingleGroup, Some(priority)) => state
                .group_index(priority)
                .is_none_or(|i| state.groups[i].all_succeeded()),
            _ => state
                .groups
                .iter()
                .flat_map(|g| &g.commands)
                .filter(|c| c.status != FixStatus::Pending)
                .all(|c| c.status == FixStatus::Success),
        };
        let status = if succeeded {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        info!(status = %status, "Remediation run finished");
        self.set_run_status(state, status);
    }

    fn set_run_status(&self, state: &mut RunState, status: RunStatus) {
        state.status = status;
        self.inner.notifier.notify(BridgeEvent::FixRunStatus {
            status: status.as_str().to_string(),
        });
    }

    fn set_command_status(
        &self,
        state: &mut RunState,
        command_id: &str,
        status: FixStatus,
        detail: Option<String>,
    ) {
        if let Some(command) = state.command_mut(command_id) {
            command.status = status;
            command.detail = detail;
            self.emit_command_status(command_id, status);
        }
    }

    fn emit_command_status(&self, command_id: &str, status: FixStatus) {
        self.inner.notifier.notify(BridgeEvent::FixCommandStatus {
            command_id: command_id.to_string(),
            status: status.as_str().to_string(),
        });
    }
}
