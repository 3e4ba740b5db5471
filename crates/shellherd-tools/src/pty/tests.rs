use super::probe::{probe_line, take_utf8, CompletionDetector};
use super::*;
use crate::test_support::RecordingNotifier;

#[test]
fn test_detector_ignores_typed_probe_echo() {
    let mut detector = CompletionDetector::new("abc123");
    let echoed = probe_line("abc123");
    assert!(echoed.contains("$?"));
    assert_eq!(detector.feed(&echoed), None);
}

#[test]
fn test_detector_matches_expanded_marker() {
    let mut detector = CompletionDetector::new("abc123");
    assert_eq!(detector.feed("hi\r\n__SHELLHERD_DONE_abc123_0__\r\n"), Some(0));

    let mut detector = CompletionDetector::new("abc123");
    assert_eq!(detector.feed("__SHELLHERD_DONE_abc123_127__"), Some(127));
}

#[test]
fn test_detector_spans_chunk_boundaries() {
    let mut detector = CompletionDetector::new("f00d");
    assert_eq!(detector.feed("output __SHELLHERD_DO"), None);
    assert_eq!(detector.feed("NE_f00d_"), None);
    assert_eq!(detector.feed("3__\r\n"), Some(3));
}

#[test]
fn test_detector_ignores_other_sessions_tags() {
    let mut detector = CompletionDetector::new("aaaa");
    assert_eq!(detector.feed("__SHELLHERD_DONE_bbbb_0__"), None);
}

#[test]
fn test_detector_tail_stays_bounded() {
    let mut detector = CompletionDetector::new("aaaa");
    for _ in 0..100 {
        assert_eq!(detector.feed("ééééééééééééééééééééééééééé"), None);
    }
    assert_eq!(detector.feed("__SHELLHERD_DONE_aaaa_1__"), Some(1));
}

#[test]
fn test_take_utf8_buffers_partial_sequences() {
    let bytes = "héllo".as_bytes();
    let mut pending = bytes[..2].to_vec();
    assert_eq!(take_utf8(&mut pending), "h");
    assert_eq!(pending.len(), 1);
    pending.extend_from_slice(&bytes[2..]);
    assert_eq!(take_utf8(&mut pending), "éllo");
    assert!(pending.is_empty());
}

#[test]
fn test_completion_reported_once_and_not_after_end() {
    let notifier = RecordingNotifier::default();
    let flags = SessionFlags::default();
    let id = SessionId::from("s1");

    assert!(probe::report_completion(&id, 2, &flags, &notifier));
    assert!(!probe::report_completion(&id, 0, &flags, &notifier));
    assert_eq!(
        notifier.events(),
        vec![BridgeEvent::CommandFinished {
            session_id: id.clone(),
            exit_code: Some(2),
            status: Some(SessionStatus::Error),
            exit_status: Some("Exited with error code 2".into()),
        }]
    );

    let ended = SessionFlags::default();
    ended.ended.store(true, Ordering::SeqCst);
    assert!(!probe::report_completion(&id, 0, &ended, &notifier));
    assert_eq!(notifier.events().len(), 1);
}

#[test]
fn test_probe_blocked_by_manual_input() {
    let flags = SessionFlags::default();
    assert!(!flags.probe_blocked());
    flags.manual_input.store(true, Ordering::SeqCst);
    assert!(flags.probe_blocked());
}

#[tokio::test(start_paused = true)]
async fn test_probes_fire_at_configured_delays() {
    let (input, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let flags = Arc::new(SessionFlags::default());
    let delays = PtyConfig::default().probe_delays();
    let task = tokio::spawn(probe::run_probes(
        SessionId::from("s"),
        input,
        flags.clone(),
        "cafe".into(),
        delays,
    ));

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert!(rx.try_recv().is_err());
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(matches!(rx.try_recv(), Ok(PtyInput::Data(_))));

    flags.completed.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    task.await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_spawn_request_input_line() {
    let plain = SpawnRequest::new("a", "ls -la");
    assert_eq!(plain.input_line(), "ls -la\r");
    assert_eq!((plain.cols, plain.rows), (80, 24));

    let exiting = SpawnRequest::new("a", "make").with_exit_when_done(true);
    assert_eq!(exiting.input_line(), "make; exit $?\r");
}

#[tokio::test]
async fn test_unknown_session_operations_are_noops() {
    let notifier = RecordingNotifier::default();
    let manager = PtyManager::new(Arc::new(notifier.clone()), ProcessTree::native());
    let id = SessionId::from("ghost");

    manager.write(&id, "ls\r");
    manager.resize(&id, 100, 40);
    assert_eq!(manager.kill(&id).await, KillOutcome::ok());
    manager.kill_all().await;
    assert_eq!(manager.report_status(&id).await, None);
    assert!(notifier.events().is_empty());
}

/// Notifier that looks the session up again while being notified.
#[derive(Default)]
struct ReentrantNotifier {
    manager: std::sync::OnceLock<std::sync::Weak<PtyManager>>,
    alive_at_spawn: std::sync::Mutex<Vec<bool>>,
}

impl Notifier for ReentrantNotifier {
    fn notify(&self, event: BridgeEvent) {
        if let BridgeEvent::SessionSpawn { session_id, .. } = &event {
            if let Some(manager) = self.manager.get().and_then(std::sync::Weak::upgrade) {
                self.alive_at_spawn
                    .lock()
                    .unwrap()
                    .push(manager.is_alive(session_id));
            }
        }
    }
}

#[tokio::test]
async fn test_spawn_notifies_outside_the_session_map_lock() {
    let notifier = Arc::new(ReentrantNotifier::default());
    let manager = Arc::new(PtyManager::new(notifier.clone(), ProcessTree::native()).with_config(
        PtyConfig {
            shell: Some("/bin/sh".into()),
            probe_enabled: false,
            ..PtyConfig::default()
        },
    ));
    notifier.manager.set(Arc::downgrade(&manager)).unwrap();

    manager.spawn(SpawnRequest::new("reentrant", "true")).unwrap();
    assert_eq!(*notifier.alive_at_spawn.lock().unwrap(), vec![true]);
    manager.kill_all().await;
}

#[cfg(not(all(unix, feature = "pty")))]
#[tokio::test]
async fn test_spawn_without_pty_emits_single_line() {
    let notifier = RecordingNotifier::default();
    let manager = PtyManager::new(Arc::new(notifier.clone()), ProcessTree::native());

    let outcome = manager.spawn(SpawnRequest::new("s", "echo hi")).unwrap();
    assert_eq!(outcome, SpawnOutcome::Unavailable);
    assert_eq!(notifier.kinds(), vec!["session-spawn", "pty-output"]);
    assert!(!manager.is_alive(&SessionId::from("s")));
}

#[cfg(all(unix, feature = "pty"))]
mod live {
    use super::*;
    use crate::events::{EventBus, Subscription};
    use tokio::time::timeout;

    fn manager(bus: &EventBus, config: PtyConfig) -> PtyManager {
        PtyManager::new(Arc::new(bus.clone()), ProcessTree::native()).with_config(PtyConfig {
            shell: Some("/bin/sh".into()),
            ..config
        })
    }

    async fn next_of(sub: &mut Subscription, kind: &str) -> BridgeEvent {
        timeout(Duration::from_secs(15), async {
            loop {
                let event = sub.recv().await.expect("bus closed");
                if event.kind() == kind {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
    }

    #[tokio::test]
    async fn test_spawn_echo_reports_output_and_completion() {
        let bus = EventBus::default();
        let id = SessionId::from("echo");
        let mut sub = bus.subscribe_session(&id);
        let manager = manager(&bus, PtyConfig::default());

        let outcome = manager.spawn(SpawnRequest::new(id.clone(), "echo hi")).unwrap();
        assert!(matches!(outcome, SpawnOutcome::Started { pid: Some(_) }));
        assert!(manager.is_alive(&id));

        match next_of(&mut sub, "process-started").await {
            BridgeEvent::ProcessStarted { pid, .. } => assert_eq!(pid, manager.pid(&id)),
            other => panic!("unexpected event: {other:?}"),
        }
        match next_of(&mut sub, "command-finished").await {
            BridgeEvent::CommandFinished {
                exit_code, status, ..
            } => {
                assert_eq!(exit_code, Some(0));
                assert_eq!(status, Some(SessionStatus::Done));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        manager.kill_all().await;
        assert!(!manager.is_alive(&id));
    }

    #[tokio::test]
    async fn test_double_spawn_rejected_and_pid_unchanged() {
        let bus = EventBus::default();
        let mut all = bus.subscribe();
        let manager = manager(&bus, PtyConfig::default());
        let id = SessionId::from("dup");

        manager.spawn(SpawnRequest::new(id.clone(), "sleep 30")).unwrap();
        let first_pid = manager.pid(&id);

        let err = manager
            .spawn(SpawnRequest::new(id.clone(), "echo second"))
            .unwrap_err();
        assert!(matches!(err, Error::SessionConflict(_)));
        assert_eq!(manager.pid(&id), first_pid);

        match next_of(&mut all, "notification").await {
            BridgeEvent::Notification { severity, .. } => assert_eq!(severity, Severity::Warning),
            other => panic!("unexpected event: {other:?}"),
        }
        manager.kill(&id).await;
    }

    #[tokio::test]
    async fn test_kill_brackets_and_reports_signal() {
        let bus = EventBus::default();
        let id = SessionId::from("victim");
        let mut sub = bus.subscribe_session(&id);
        let manager = manager(&bus, PtyConfig::default());

        manager.spawn(SpawnRequest::new(id.clone(), "sleep 30")).unwrap();
        next_of(&mut sub, "process-started").await;

        let outcome = manager.kill(&id).await;
        assert!(outcome.success, "kill failed: {:?}", outcome.error);
        assert!(!manager.is_alive(&id));

        // Everything was published before kill returned
        let seen: Vec<BridgeEvent> = std::iter::from_fn(|| sub.try_recv()).collect();
        let kinds: Vec<&str> = seen.iter().map(BridgeEvent::kind).collect();
        let position = |kind: &str| kinds.iter().position(|k| *k == kind);
        let terminating = position("process-terminating").expect("no process-terminating");
        let ended = position("process-ended").expect("no process-ended");
        let terminated = position("process-terminated").expect("no process-terminated");
        assert!(terminating < ended && ended < terminated, "order: {kinds:?}");
        for event in &seen {
            match event {
                BridgeEvent::ProcessTerminated { success, .. } => assert!(*success),
                BridgeEvent::ProcessEnded { signal, .. } => assert_eq!(*signal, Some(9)),
                _ => {}
            }
        }

        // The id is free again once killed
        manager.spawn(SpawnRequest::new(id.clone(), "true")).unwrap();
        manager.kill(&id).await;
    }

    #[tokio::test]
    async fn test_respawn_after_kill_sees_no_stale_exit() {
        let bus = EventBus::default();
        let id = SessionId::from("reused");
        let manager = manager(&bus, PtyConfig::default());

        for _ in 0..5 {
            manager.spawn(SpawnRequest::new(id.clone(), "sleep 30")).unwrap();
            manager.kill(&id).await;

            let mut sub = bus.subscribe_session(&id);
            manager.spawn(SpawnRequest::new(id.clone(), "sleep 30")).unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;

            while let Some(event) = sub.try_recv() {
                assert_ne!(event.kind(), "process-ended", "stale exit after respawn");
            }
            assert!(manager.is_alive(&id));
            manager.kill(&id).await;
        }
    }

    struct FlushFails {
        writes: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl tokio::io::AsyncWrite for FlushFails {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    impl native::TerminalWriter for FlushFails {
        fn resize_terminal(&self, _cols: u16, _rows: u16) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_input_pump_stops_when_flush_fails() {
        let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (input, input_rx) = tokio::sync::mpsc::unbounded_channel();
        input.send(PtyInput::Data(b"first\r".to_vec())).unwrap();
        input.send(PtyInput::Data(b"second\r".to_vec())).unwrap();

        let writer = FlushFails {
            writes: writes.clone(),
        };
        timeout(Duration::from_secs(5), native::pump_input(writer, input_rx))
            .await
            .expect("input pump kept running after a failed flush");
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        drop(input);
    }

    #[tokio::test]
    async fn test_exit_when_done_reports_exit_code() {
        let bus = EventBus::default();
        let id = SessionId::from("exits");
        let mut sub = bus.subscribe_session(&id);
        let manager = manager(&bus, PtyConfig::default());

        manager
            .spawn(SpawnRequest::new(id.clone(), "sh -c 'exit 3'").with_exit_when_done(true))
            .unwrap();
        match next_of(&mut sub, "process-ended").await {
            BridgeEvent::ProcessEnded { code, signal, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(signal, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!manager.is_alive(&id));
    }

    #[tokio::test]
    async fn test_manual_input_disables_probe() {
        let bus = EventBus::default();
        let id = SessionId::from("typed");
        let mut sub = bus.subscribe_session(&id);
        let manager = manager(
            &bus,
            PtyConfig {
                probe_initial_delay_ms: 100,
                probe_followup_delay_ms: 100,
                ..PtyConfig::default()
            },
        );

        manager.spawn(SpawnRequest::new(id.clone(), "true")).unwrap();
        manager.write(&id, "echo typed\r");

        tokio::time::sleep(Duration::from_millis(800)).await;
        while let Some(event) = sub.try_recv() {
            assert_ne!(event.kind(), "command-finished");
        }
        manager.kill(&id).await;
    }

    #[tokio::test]
    async fn test_report_status_lists_running_children() {
        let bus = EventBus::default();
        let id = SessionId::from("busy");
        let mut sub = bus.subscribe_session(&id);
        let manager = manager(&bus, PtyConfig::default());

        manager.spawn(SpawnRequest::new(id.clone(), "sleep 30")).unwrap();
        next_of(&mut sub, "process-started").await;

        let mut status = None;
        for _ in 0..50 {
            status = manager.report_status(&id).await;
            if status == Some(SessionStatus::Processing) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(status, Some(SessionStatus::Processing));
        manager.kill(&id).await;
    }
}
