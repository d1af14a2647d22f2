//! Integration tests for the session manager.
//!
//! Drives the manager through its public handle with a fake spawner and
//! observes it through the broadcast notifications, the way the server does.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{next_matching, next_recovery, EchoSpawner};
use termhost_core::{
    fallback_shells, Platform, RecoveryStatus, SessionId, SessionOptions, SessionStatus,
};
use termhostd::manager::{spawn_manager_with, ManagerConfig, ManagerError, ManagerHandle, TerminalEvent};

// ============================================================================
// Helpers
// ============================================================================

fn start(spawner: &EchoSpawner) -> ManagerHandle {
    start_with(spawner, ManagerConfig::default())
}

fn start_with(spawner: &EchoSpawner, config: ManagerConfig) -> ManagerHandle {
    spawn_manager_with(config, Arc::new(spawner.clone()))
}

fn with_shell(shell: &str) -> SessionOptions {
    SessionOptions {
        shell: Some(shell.to_string()),
        ..SessionOptions::default()
    }
}

async fn status_of(manager: &ManagerHandle, id: &SessionId) -> Option<SessionStatus> {
    manager.get_session(id).await.map(|view| view.status)
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_uses_platform_default_shell() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);

    let id = manager.create(SessionOptions::default()).await.unwrap();

    let view = manager.get_session(&id).await.expect("session exists");
    assert_eq!(view.shell, fallback_shells(Platform::current())[0]);
    assert_eq!((view.cols, view.rows), (80, 24));
    assert_eq!(view.status, SessionStatus::Active);
    assert_eq!(view.crash_count, 0);
}

#[tokio::test]
async fn test_create_falls_back_past_broken_shell() {
    let spawner = EchoSpawner::new();
    spawner.break_shell("/opt/missing/fish");
    let manager = start(&spawner);

    let id = manager.create(with_shell("/opt/missing/fish")).await.unwrap();

    let view = manager.get_session(&id).await.unwrap();
    assert_eq!(view.shell, fallback_shells(Platform::current())[0]);
}

#[tokio::test]
async fn test_create_reports_every_attempt_when_nothing_starts() {
    let spawner = EchoSpawner::new();
    spawner.fail_all(true);
    let manager = start(&spawner);

    let err = manager.create(with_shell("fish")).await.unwrap_err();
    match err {
        ManagerError::AllShellsFailed { attempted, .. } => {
            assert_eq!(attempted.first().map(String::as_str), Some("fish"));
            assert_eq!(attempted.len(), 1 + fallback_shells(Platform::current()).len());
        }
        other => panic!("Expected AllShellsFailed, got {other:?}"),
    }
    assert!(manager.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_ids_are_unique() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);

    let a = manager.create(with_shell("sh")).await.unwrap();
    let b = manager.create(with_shell("sh")).await.unwrap();

    assert_ne!(a, b);
    assert_eq!(manager.list_sessions().await.len(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_create_survives_non_utf8_environment() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    manager.create(with_shell("sh")).await.unwrap();

    let name = "TERMHOST_MANAGER_NON_UTF8";
    std::env::set_var(name, OsStr::from_bytes(b"f\xffo"));
    let created = manager.create(with_shell("sh")).await;
    std::env::remove_var(name);

    created.unwrap();
    assert!(!spawner.config(1).env.contains_key(name));
    manager.create(with_shell("sh")).await.unwrap();
    assert_eq!(manager.list_sessions().await.len(), 3);
}

// ============================================================================
// Input and Output
// ============================================================================

#[tokio::test]
async fn test_write_is_echoed_as_data() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let mut events = manager.subscribe();

    let id = manager.create(with_shell("sh")).await.unwrap();
    manager.write(&id, "echo hello\n").await.unwrap();

    let event = next_matching(&mut events, |e| matches!(e, TerminalEvent::Data { .. })).await;
    assert_eq!(
        event,
        TerminalEvent::Data {
            id,
            data: "echo hello\n".to_string()
        }
    );
}

#[tokio::test]
async fn test_write_to_unknown_session() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);

    let missing = SessionId::new("does-not-exist");
    let err = manager.write(&missing, "ls\n").await.unwrap_err();
    assert_eq!(err, ManagerError::SessionNotFound(missing));
    assert_eq!(err.code(), "session_not_found");
}

#[tokio::test]
async fn test_resize_updates_view() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);

    let id = manager.create(with_shell("sh")).await.unwrap();
    manager.resize(&id, 132, 43).await.unwrap();

    let view = manager.get_session(&id).await.unwrap();
    assert_eq!((view.cols, view.rows), (132, 43));

    let err = manager.resize(&id, 0, 43).await.unwrap_err();
    assert_eq!(err.code(), "invalid_request");
}

// ============================================================================
// Exit and Recovery
// ============================================================================

#[tokio::test]
async fn test_clean_exit_removes_session() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let mut events = manager.subscribe();

    let id = manager.create(with_shell("sh")).await.unwrap();
    spawner.exit_last(Some(0)).await;

    let event = next_matching(&mut events, |e| matches!(e, TerminalEvent::Exit { .. })).await;
    assert_eq!(
        event,
        TerminalEvent::Exit {
            id: id.clone(),
            code: Some(0)
        }
    );
    assert!(manager.get_session(&id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_crash_is_recovered_with_same_config() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let mut events = manager.subscribe();

    let id = manager.create(with_shell("sh")).await.unwrap();
    manager.resize(&id, 100, 30).await.unwrap();
    spawner.exit_last(Some(1)).await;

    assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovering);
    assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovered);

    assert_eq!(spawner.spawn_count(), 2);
    assert_eq!(spawner.config(1), spawner.config(0));
    assert_eq!((spawner.config(1).size.cols, spawner.config(1).size.rows), (80, 24));

    let view = manager.get_session(&id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Active);
    assert_eq!(view.crash_count, 1);

    // Input goes to the new process.
    manager.write(&id, "pwd\n").await.unwrap();
    let event = next_matching(&mut events, |e| matches!(e, TerminalEvent::Data { .. })).await;
    assert_eq!(event.session_id(), &id);
}

#[tokio::test(start_paused = true)]
async fn test_crash_loop_disables_session() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let mut events = manager.subscribe();

    let id = manager.create(with_shell("sh")).await.unwrap();

    // Four crashes are recovered, the fifth inside the window disables.
    for _ in 0..4 {
        spawner.exit_last(Some(1)).await;
        assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovering);
        assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovered);
    }
    spawner.exit_last(Some(1)).await;
    assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Disabled);

    assert_eq!(status_of(&manager, &id).await, Some(SessionStatus::Disabled));
    assert_eq!(spawner.spawn_count(), 5);

    let err = manager.write(&id, "ls\n").await.unwrap_err();
    assert_eq!(err, ManagerError::SessionDisabled(id.clone()));

    // Disabled sessions stay until destroyed.
    manager.destroy(&id).await.unwrap();
    assert!(manager.get_session(&id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_crashes_outside_window_do_not_disable() {
    let spawner = EchoSpawner::new();
    let config = ManagerConfig {
        crash_threshold: 2,
        crash_window: Duration::from_secs(10),
        ..ManagerConfig::default()
    };
    let manager = start_with(&spawner, config);
    let mut events = manager.subscribe();

    let id = manager.create(with_shell("sh")).await.unwrap();

    for _ in 0..3 {
        spawner.exit_last(Some(1)).await;
        assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovering);
        assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovered);
        tokio::time::sleep(Duration::from_secs(30)).await;
    }

    let view = manager.get_session(&id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Active);
    assert_eq!(view.crash_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_respawn_disables() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let mut events = manager.subscribe();

    let id = manager.create(with_shell("sh")).await.unwrap();
    spawner.fail_all(true);
    spawner.exit_last(Some(137)).await;

    assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovering);
    assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Disabled);
    assert_eq!(status_of(&manager, &id).await, Some(SessionStatus::Disabled));
}

#[tokio::test(start_paused = true)]
async fn test_destroy_during_recovery_cancels_respawn() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let mut events = manager.subscribe();

    let id = manager.create(with_shell("sh")).await.unwrap();
    spawner.exit_last(Some(1)).await;
    assert_eq!(next_recovery(&mut events, &id).await, RecoveryStatus::Recovering);

    manager.destroy(&id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(spawner.spawn_count(), 1);
    assert!(manager.list_sessions().await.is_empty());
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);

    let id = manager.create(with_shell("sh")).await.unwrap();
    manager.destroy(&id).await.unwrap();
    manager.destroy(&id).await.unwrap();

    assert_eq!(spawner.kills(0), 1);
}

#[tokio::test]
async fn test_cleanup_kills_everything() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);

    for _ in 0..3 {
        manager.create(with_shell("sh")).await.unwrap();
    }

    assert_eq!(manager.cleanup().await.unwrap(), 3);
    assert!(manager.list_sessions().await.is_empty());
    for index in 0..3 {
        assert_eq!(spawner.kills(index), 1);
    }
    assert_eq!(manager.cleanup().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dropping_every_handle_stops_manager() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let id = manager.create(with_shell("sh")).await.unwrap();
    manager.write(&id, "still running\n").await.unwrap();

    let listener = spawner.last_listener();
    drop(manager);

    tokio::time::timeout(Duration::from_secs(5), async {
        while spawner.kills(0) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("orphaned shell killed");
    assert!(!listener.emit(termhostd::pty::ProcessEvent::Exited(Some(0))).await);
}

#[tokio::test]
async fn test_events_from_destroyed_session_are_dropped() {
    let spawner = EchoSpawner::new();
    let manager = start(&spawner);
    let mut events = manager.subscribe();

    let stale = manager.create(with_shell("sh")).await.unwrap();
    let stale_listener = spawner.listener(0);
    manager.destroy(&stale).await.unwrap();

    stale_listener
        .emit(termhostd::pty::ProcessEvent::Output("late".to_string()))
        .await;

    let live = manager.create(with_shell("sh")).await.unwrap();
    manager.write(&live, "x").await.unwrap();

    let event = next_matching(&mut events, |_| true).await;
    assert_eq!(event.session_id(), &live);
}
