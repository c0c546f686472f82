//! Integration tests for session lifecycle and the durable snapshot

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use kodegen_claude_companion::session::{NewSession, SessionManager, SessionSettings, TimeoutDecision};
use kodegen_claude_companion::{Classifier, ClassifyMode, SessionId};
use serde_json::json;
use tokio::time::Instant;

fn settings() -> SessionSettings {
    SessionSettings {
        max_sessions: 4,
        foreground_timeout: Duration::from_secs(1800),
        background_timeout: Duration::from_secs(86_400),
        min_rearm_delay: Duration::from_secs(60),
        max_session_age: Duration::from_secs(7 * 86_400),
        max_prompt_length: 100_000,
        allow_skip_permissions: false,
        forbidden_paths: Vec::new(),
    }
}

fn manager(dir: &Path) -> SessionManager {
    SessionManager::new(settings(), Classifier::default(), dir.join("sessions.json"))
}

fn new_session(dir: &Path, prompt: &str) -> NewSession {
    NewSession {
        session_id: None,
        working_directory: dir.to_string_lossy().into_owned(),
        prompt: prompt.to_string(),
        skip_permissions: false,
        mode: ClassifyMode::Streaming,
    }
}

#[tokio::test(start_paused = true)]
async fn test_busy_session_outlives_its_idle_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut sessions = manager(dir.path());
    let (id, _) = sessions.create(new_session(dir.path(), "build it")).unwrap();
    sessions.begin_request(&id, "build it", ClassifyMode::Streaming).unwrap();

    // Far past the foreground limit, still processing
    tokio::time::advance(Duration::from_secs(4000)).await;
    assert_eq!(
        sessions.check_timeout(&id, Instant::now()),
        TimeoutDecision::Rearm(Duration::from_secs(60))
    );

    // Result arrives: the limit restarts from the last activity
    sessions.classify(
        &id,
        &json!({"type":"result","subtype":"success","result":"ok","is_error":false,"session_id":"a1"}),
    );
    sessions.finish_request(&id);
    assert_eq!(
        sessions.check_timeout(&id, Instant::now()),
        TimeoutDecision::Rearm(Duration::from_secs(1800))
    );

    tokio::time::advance(Duration::from_secs(1800)).await;
    assert_eq!(sessions.check_timeout(&id, Instant::now()), TimeoutDecision::Close);
}

#[tokio::test]
async fn test_closed_session_leaves_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut sessions = manager(dir.path());
    let (keep, _) = sessions.create(new_session(dir.path(), "one")).unwrap();
    let (gone, _) = sessions.create(new_session(dir.path(), "two")).unwrap();
    sessions.persist().await.unwrap();

    assert!(sessions.close(&gone).is_some());
    assert!(sessions.close(&gone).is_none());
    sessions.persist().await.unwrap();

    let mut reloaded = manager(dir.path());
    let restored = reloaded.restore().await.unwrap();
    assert_eq!(restored, vec![keep.clone()]);
    assert!(reloaded.get(&keep).unwrap().restored);
    assert!(!reloaded.contains(&gone));
}

#[tokio::test]
async fn test_corrupt_snapshot_falls_back_to_backup() {
    let dir = tempfile::tempdir().unwrap();
    let mut sessions = manager(dir.path());
    let (first, _) = sessions.create(new_session(dir.path(), "first")).unwrap();
    sessions.persist().await.unwrap();
    // Second write moves the first snapshot to the backup
    sessions.persist().await.unwrap();

    std::fs::write(dir.path().join("sessions.json"), b"{ truncated").unwrap();

    let mut reloaded = manager(dir.path());
    let restored = reloaded.restore().await.unwrap();
    assert_eq!(restored, vec![first]);
}

#[tokio::test]
async fn test_missing_snapshot_restores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut sessions = manager(dir.path());
    assert!(sessions.restore().await.unwrap().is_empty());
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_reconcile_only_selects_old_restored_sessions_without_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut sessions = manager(dir.path());
    let (a, _) = sessions.create(new_session(dir.path(), "a")).unwrap();
    let (b, _) = sessions.create(new_session(dir.path(), "b")).unwrap();
    sessions.persist().await.unwrap();

    let mut reloaded = manager(dir.path());
    reloaded.restore().await.unwrap();

    let now = Utc::now();
    assert!(reloaded.reconcile(now, |_| false).is_empty());

    let later = now + chrono::Duration::days(8);
    let mut stale = reloaded.reconcile(later, |id| id == &b);
    stale.sort();
    assert_eq!(stale, vec![a.clone()]);

    // Binding to a process takes a session out of reconciliation
    reloaded.mark_bound(&a);
    assert!(reloaded.reconcile(later, |_| false).iter().all(|id| id != &a));
    assert!(!reloaded.contains(&SessionId::new("unknown")));
}
