//! Wiring of the supervision components
//!
//! One event bus feeds the session store; the store feeds the auto-setup
//! orchestrator; PTY sessions and container operations publish onto the bus.

use crate::config::AppConfig;
use shellherd_core::{AutoSetupOrchestrator, SessionLauncher, SessionStore};
use shellherd_tools::{
    native_platform, CommandRunner, ContainerManager, EventBus, Notifier, ProcessTree, PtyManager,
    TokioCommandRunner,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Runtime {
    pub bus: EventBus,
    pub store: SessionStore,
    pub pty: Arc<PtyManager>,
    pub containers: ContainerManager,
    pub orchestrator: AutoSetupOrchestrator,
    pub tree: ProcessTree,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    pub fn new(config: &AppConfig) -> Self {
        let bus = EventBus::default();
        let notifier: Arc<dyn Notifier> = Arc::new(bus.clone());
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
        let tree = ProcessTree::new(native_platform(runner.clone()));

        let pty = Arc::new(
            PtyManager::new(notifier.clone(), tree.clone()).with_config(config.pty.clone()),
        );
        let containers = ContainerManager::new(runner)
            .with_notifier(notifier.clone())
            .with_config(config.containers.clone());

        let store = SessionStore::default();
        let launcher: Arc<dyn SessionLauncher> = pty.clone();
        let orchestrator =
            AutoSetupOrchestrator::new(launcher, notifier, config.autosetup.clone());
        let tasks = vec![store.attach(&bus), orchestrator.attach(&store)];

        Self {
            bus,
            store,
            pty,
            containers,
            orchestrator,
            tree,
            tasks,
        }
    }

    /// Kill every live session and stop background tasks.
    pub async fn shutdown(self) {
        self.pty.kill_all().await;
        for task in self.tasks {
            task.abort();
        }
        debug!("Runtime shut down");
    }
}
