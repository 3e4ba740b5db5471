//! Session launching seam for the orchestrator

use async_trait::async_trait;
use shellherd_tools::{PtyManager, SessionId, SpawnOutcome, SpawnRequest};

/// Opens and closes the sessions that run fix commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Start `command` under `session_id`
    fn launch(&self, session_id: &SessionId, command: &str) -> shellherd_tools::Result<()>;

    /// Kill the session; true when every process was signalled
    async fn terminate(&self, session_id: &SessionId) -> bool;

    /// Whether the session still has a live process
    fn is_active(&self, session_id: &SessionId) -> bool;
}

#[async_trait]
impl SessionLauncher for PtyManager {
    fn launch(&self, session_id: &SessionId, command: &str) -> shellherd_tools::Result<()> {
        match self.spawn(SpawnRequest::new(session_id.clone(), command))? {
            SpawnOutcome::Started { .. } => Ok(()),
            SpawnOutcome::Unavailable => Err(shellherd_tools::Error::Pty(
                "PTY support is unavailable".to_string(),
            )),
        }
    }

    async fn terminate(&self, session_id: &SessionId) -> bool {
        self.kill(session_id).await.success
    }

    fn is_active(&self, session_id: &SessionId) -> bool {
        self.is_alive(session_id)
    }
}
