use super::launcher::MockSessionLauncher;
use crate::error::Error;
use super::*;
use crate::state::SessionRecord;
use shellherd_tools::{BridgeEvent, EventBus, SessionId, SessionStatus, Severity, Subscription};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn plan() -> Vec<FixCommand> {
    vec![
        FixCommand::new("node", "Install Node", "brew install node", 2),
        FixCommand::new("git", "Install Git", "brew install git", 1),
        FixCommand::new("deps", "Install deps", "npm ci", 2),
        FixCommand::new("db", "Start DB", "docker compose up -d", 3),
    ]
}

/// Launcher mock that records launched session ids and never fails.
fn recording_launcher(launched: Arc<Mutex<Vec<String>>>) -> MockSessionLauncher {
    let mut launcher = MockSessionLauncher::new();
    launcher.expect_launch().returning(move |id, _| {
        launched.lock().unwrap().push(id.to_string());
        Ok(())
    });
    launcher.expect_is_active().returning(|_| false);
    launcher
}

fn orchestrator(launcher: MockSessionLauncher, config: AutoSetupConfig) -> (AutoSetupOrchestrator, Subscription) {
    let bus = EventBus::default();
    let sub = bus.subscribe();
    let orchestrator = AutoSetupOrchestrator::new(Arc::new(launcher), Arc::new(bus), config);
    (orchestrator, sub)
}

fn record(command_id: &str, status: SessionStatus) -> SessionRecord {
    let mut record = SessionRecord::new(session_id_for(command_id), "cmd");
    record.status = status;
    record.exit_status = Some(status.to_string());
    record
}

fn drain(sub: &mut Subscription) -> Vec<BridgeEvent> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

fn warnings(events: &[BridgeEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            BridgeEvent::Notification {
                message,
                severity: Severity::Warning,
            } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_open_groups_by_ascending_priority() {
    let (orchestrator, mut sub) = orchestrator(MockSessionLauncher::new(), AutoSetupConfig::default());
    let snapshot = orchestrator.open(plan()).await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Preparing);
    let priorities: Vec<u32> = snapshot.groups.iter().map(|g| g.priority).collect();
    assert_eq!(priorities, vec![1, 2, 3]);
    let second: Vec<&str> = snapshot.groups[1].commands.iter().map(|c| c.fix.id.as_str()).collect();
    assert_eq!(second, vec!["node", "deps"]);
    assert!(snapshot
        .groups
        .iter()
        .flat_map(|g| &g.commands)
        .all(|c| c.status == FixStatus::Pending));

    let events = drain(&mut sub);
    assert_eq!(events[0], BridgeEvent::FixRunStatus { status: "preparing".into() });
    assert_eq!(events.len(), 5);
}

#[tokio::test]
async fn test_open_rejects_duplicate_ids() {
    let (orchestrator, _sub) = orchestrator(MockSessionLauncher::new(), AutoSetupConfig::default());
    let fixes = vec![
        FixCommand::new("a", "A", "true", 1),
        FixCommand::new("a", "A again", "true", 2),
    ];
    assert!(matches!(orchestrator.open(fixes).await, Err(Error::InvalidPlan(_))));
}

#[tokio::test]
async fn test_start_before_open_is_an_error() {
    let (orchestrator, _sub) = orchestrator(MockSessionLauncher::new(), AutoSetupConfig::default());
    assert!(matches!(orchestrator.start_all().await, Err(Error::NotOpened)));
    assert!(matches!(orchestrator.start_group(1).await, Err(Error::NotOpened)));
    assert!(matches!(orchestrator.stop_all().await, Err(Error::NotOpened)));
    assert!(matches!(
        orchestrator.terminate_command("git").await,
        Err(Error::NotOpened)
    ));
}

#[tokio::test]
async fn test_unknown_ids_are_errors() {
    let (orchestrator, _sub) = orchestrator(MockSessionLauncher::new(), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    assert!(matches!(orchestrator.start_group(9).await, Err(Error::UnknownGroup(9))));
    assert!(matches!(
        orchestrator.terminate_command("nope").await,
        Err(Error::UnknownCommand(_))
    ));
}

#[tokio::test]
async fn test_start_all_runs_lowest_group_first() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched.clone()), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_all().await.unwrap();

    assert_eq!(*launched.lock().unwrap(), vec!["autosetup-git".to_string()]);
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Running);
    assert_eq!(snapshot.active_group, Some(1));
    assert_eq!(snapshot.command_status("git"), Some(FixStatus::Running));
    assert_eq!(snapshot.command_status("node"), Some(FixStatus::Pending));
    assert!(matches!(orchestrator.start_all().await, Err(Error::RunInProgress)));
}

#[tokio::test]
async fn test_successful_groups_advance_to_completion() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched.clone()), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_all().await.unwrap();

    orchestrator.on_session_change(&record("git", SessionStatus::Done)).await;
    assert_eq!(launched.lock().unwrap().len(), 3);
    assert_eq!(orchestrator.snapshot().await.active_group, Some(2));

    orchestrator.on_session_change(&record("node", SessionStatus::Done)).await;
    assert_eq!(orchestrator.snapshot().await.active_group, Some(2));
    orchestrator.on_session_change(&record("deps", SessionStatus::Done)).await;
    assert_eq!(orchestrator.snapshot().await.active_group, Some(3));

    orchestrator.on_session_change(&record("db", SessionStatus::Done)).await;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(
        *launched.lock().unwrap(),
        vec!["autosetup-git", "autosetup-node", "autosetup-deps", "autosetup-db"]
    );
}

#[tokio::test]
async fn test_failure_completes_group_then_halts() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched.clone()), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_group(2).await.unwrap();
    orchestrator.on_session_change(&record("node", SessionStatus::Error)).await;

    // The sibling keeps running after a failure
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Running);
    assert_eq!(snapshot.command_status("node"), Some(FixStatus::Failed));
    assert_eq!(snapshot.command_status("deps"), Some(FixStatus::Running));

    orchestrator.on_session_change(&record("deps", SessionStatus::Done)).await;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(launched.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_sequential_run_halts_on_failure_by_default() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched.clone()), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_all().await.unwrap();
    orchestrator.on_session_change(&record("git", SessionStatus::Error)).await;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.command_status("node"), Some(FixStatus::Pending));
    assert_eq!(launched.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_continue_on_failure_advances() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let config = AutoSetupConfig {
        continue_on_failure: true,
        ..AutoSetupConfig::default()
    };
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched.clone()), config);
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_all().await.unwrap();
    orchestrator.on_session_change(&record("git", SessionStatus::Error)).await;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Running);
    assert_eq!(snapshot.active_group, Some(2));
    assert_eq!(launched.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_start_group_does_not_advance() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched.clone()), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_group(3).await.unwrap();
    orchestrator.on_session_change(&record("db", SessionStatus::Done)).await;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(*launched.lock().unwrap(), vec!["autosetup-db".to_string()]);
}

#[tokio::test]
async fn test_launch_failure_marks_command_failed() {
    let mut launcher = MockSessionLauncher::new();
    launcher
        .expect_launch()
        .returning(|id, _| Err(shellherd_tools::Error::SessionConflict(id.to_string())));
    launcher.expect_is_active().returning(|_| false);
    let (orchestrator, mut sub) = orchestrator(launcher, AutoSetupConfig::default());
    orchestrator
        .open(vec![FixCommand::new("a", "A", "true", 1)])
        .await
        .unwrap();
    orchestrator.start_all().await.unwrap();

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.command_status("a"), Some(FixStatus::Failed));
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert!(drain(&mut sub).iter().any(|e| matches!(
        e,
        BridgeEvent::Notification {
            severity: Severity::Error,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_marks_command_and_leaves_session_alive() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let mut launcher = recording_launcher(launched);
    launcher.expect_terminate().never();
    let (orchestrator, mut sub) = orchestrator(launcher, AutoSetupConfig::default());
    orchestrator
        .open(vec![FixCommand::new("slow", "Slow step", "sleep 600", 1)])
        .await
        .unwrap();
    orchestrator.start_all().await.unwrap();
    drain(&mut sub);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(
        orchestrator.snapshot().await.command_status("slow"),
        Some(FixStatus::Running)
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.command_status("slow"), Some(FixStatus::Timeout));
    assert_eq!(snapshot.status, RunStatus::Failed);

    tokio::time::sleep(Duration::from_secs(120)).await;
    let warnings = warnings(&drain(&mut sub));
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Slow step"));
    assert!(warnings[0].contains("60 seconds"));
}

#[tokio::test(start_paused = true)]
async fn test_completion_cancels_timeout() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, mut sub) = orchestrator(recording_launcher(launched), AutoSetupConfig::default());
    orchestrator
        .open(vec![FixCommand::new("quick", "Quick", "true", 1)])
        .await
        .unwrap();
    orchestrator.start_all().await.unwrap();
    orchestrator.on_session_change(&record("quick", SessionStatus::Done)).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(warnings(&drain(&mut sub)).is_empty());
    assert_eq!(
        orchestrator.snapshot().await.command_status("quick"),
        Some(FixStatus::Success)
    );
}

#[tokio::test]
async fn test_terminate_command_kills_session() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let mut launcher = recording_launcher(launched);
    launcher
        .expect_terminate()
        .withf(|id: &SessionId| id.as_str() == "autosetup-node")
        .times(1)
        .returning(|_| true);
    let (orchestrator, mut sub) = orchestrator(launcher, AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_group(2).await.unwrap();
    drain(&mut sub);

    orchestrator.terminate_command("node").await.unwrap();
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.command_status("node"), Some(FixStatus::Stopped));
    assert_eq!(snapshot.command_status("deps"), Some(FixStatus::Running));

    let events = drain(&mut sub);
    assert!(events.contains(&BridgeEvent::FixCommandStatus {
        command_id: "node".into(),
        status: "stopped".into(),
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        BridgeEvent::Notification { message, .. } if message.contains("Install Node")
    )));

    // A late session report does not resurrect the command
    orchestrator.on_session_change(&record("node", SessionStatus::Done)).await;
    assert_eq!(
        orchestrator.snapshot().await.command_status("node"),
        Some(FixStatus::Stopped)
    );
}

#[tokio::test]
async fn test_stop_all_kills_running_commands() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let killed = Arc::new(Mutex::new(Vec::new()));
    let mut launcher = recording_launcher(launched);
    let record_kill = killed.clone();
    launcher.expect_terminate().returning(move |id| {
        record_kill.lock().unwrap().push(id.to_string());
        true
    });
    let (orchestrator, _sub) = orchestrator(launcher, AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_group(2).await.unwrap();
    orchestrator.on_session_change(&record("deps", SessionStatus::Done)).await;

    orchestrator.stop_all().await.unwrap();
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.status, RunStatus::Stopped);
    assert_eq!(snapshot.command_status("node"), Some(FixStatus::Stopped));
    assert_eq!(snapshot.command_status("deps"), Some(FixStatus::Success));
    assert_eq!(*killed.lock().unwrap(), vec!["autosetup-node".to_string()]);
}

#[tokio::test]
async fn test_rerun_stops_leftover_session_before_launch() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut launcher = MockSessionLauncher::new();
    let launches = calls.clone();
    launcher.expect_launch().returning(move |id, _| {
        launches.lock().unwrap().push(format!("launch {id}"));
        Ok(())
    });
    let terminations = calls.clone();
    launcher.expect_terminate().returning(move |id| {
        terminations.lock().unwrap().push(format!("terminate {id}"));
        true
    });
    launcher
        .expect_is_active()
        .returning(|id| id.as_str() == "autosetup-db");
    let (orchestrator, _sub) = orchestrator(launcher, AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();

    orchestrator.start_group(3).await.unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["terminate autosetup-db".to_string(), "launch autosetup-db".to_string()]
    );
    assert_eq!(
        orchestrator.snapshot().await.command_status("db"),
        Some(FixStatus::Running)
    );
}

#[tokio::test]
async fn test_changes_from_an_earlier_run_are_ignored() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    let earlier = record("db", SessionStatus::Error);

    orchestrator.start_group(3).await.unwrap();
    orchestrator.on_session_change(&earlier).await;
    assert_eq!(
        orchestrator.snapshot().await.command_status("db"),
        Some(FixStatus::Running)
    );

    orchestrator.on_session_change(&record("db", SessionStatus::Done)).await;
    assert_eq!(
        orchestrator.snapshot().await.command_status("db"),
        Some(FixStatus::Success)
    );
}

#[tokio::test]
async fn test_reopen_resets_run() {
    let launched = Arc::new(Mutex::new(Vec::new()));
    let (orchestrator, _sub) = orchestrator(recording_launcher(launched), AutoSetupConfig::default());
    orchestrator.open(plan()).await.unwrap();
    orchestrator.start_all().await.unwrap();
    assert!(matches!(orchestrator.open(plan()).await, Err(Error::RunInProgress)));

    orchestrator.on_session_change(&record("git", SessionStatus::Error)).await;
    let snapshot = orchestrator
        .open(vec![FixCommand::new("x", "X", "true", 5)])
        .await
        .unwrap();
    assert_eq!(snapshot.groups.len(), 1);
    assert_eq!(snapshot.status, RunStatus::Preparing);
}

#[test]
fn test_config_validation() {
    assert!(AutoSetupConfig::default().validate().is_ok());
    let bad = AutoSetupConfig {
        command_timeout_secs: 0,
        ..AutoSetupConfig::default()
    };
    assert!(matches!(bad.validate(), Err(Error::InvalidConfig { .. })));
}

#[test]
fn test_fix_command_accepts_both_field_names() {
    let a: FixCommand =
        serde_json::from_str(r#"{"id":"a","title":"A","fixCommand":"make","priority":1}"#).unwrap();
    let b: FixCommand = serde_json::from_str(r#"{"id":"b","title":"B","command":"make"}"#).unwrap();
    assert_eq!(a.fix_command, "make");
    assert_eq!(b.fix_command, "make");
    assert_eq!(b.priority, 0);
}
