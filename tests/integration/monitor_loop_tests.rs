//! End-to-end monitor loop scenarios over the scripted multiplexer:
//! sequential completion, rate-limit waits, crash escalation, and the
//! wall-clock task budget.

use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use agent_warden::models::checkpoint::{CheckpointScope, SessionCheckpoint, WaitCheckpoint};
use agent_warden::models::rate_limit::PatternKind;
use agent_warden::models::task::TaskStatus;
use agent_warden::persistence::store::CheckpointStore;
use agent_warden::supervisor::monitor::{MonitorOutcome, MonitorSettings};

use super::test_helpers::{
    build_monitor, seed_tasks, settings, task, wait_for, FakeMultiplexer, MARKER,
};

fn read_wait(store: &CheckpointStore) -> Option<WaitCheckpoint> {
    store
        .read::<WaitCheckpoint>(CheckpointScope::Wait)
        .expect("read wait checkpoint")
}

const BACKOFF: Duration = Duration::from_millis(300);

#[tokio::test]
async fn tasks_run_to_completion_in_order() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["first task", "second task"]);
    let fake = FakeMultiplexer::alive();
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(
        || fake.sent().first().map(String::as_str) == Some("first task"),
        "first payload dispatched",
    )
    .await;
    fake.append(&format!("{MARKER}\n"));

    wait_for(
        || fake.sent().get(1).map(String::as_str) == Some("second task"),
        "second payload dispatched",
    )
    .await;
    fake.append(&format!("{MARKER}\n"));

    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);

    for id in &ids {
        let record = task(dir.path(), id);
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.attempt_count, 1);
        assert!(record.completed_at.is_some());
    }
    assert_eq!(fake.sent().len(), 2);
}

#[tokio::test]
async fn rate_limit_pauses_then_resumes_the_running_task() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["throttled task"]);
    let fake = FakeMultiplexer::alive();
    let store = CheckpointStore::open(dir.path()).expect("open store");
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "payload dispatched").await;
    fake.append("Error: usage limit exceeded\n");

    wait_for(
        || {
            store
                .read::<WaitCheckpoint>(CheckpointScope::Wait)
                .expect("read wait")
                .is_some()
        },
        "wait checkpoint written",
    )
    .await;

    let wait = store
        .read::<WaitCheckpoint>(CheckpointScope::Wait)
        .expect("read wait")
        .expect("wait present");
    assert_eq!(wait.pattern_kind, PatternKind::GenericExceeded);
    assert_eq!(wait.raw_text, "usage limit exceeded");

    // The running task is untouched while the supervisor waits.
    let record = task(dir.path(), &ids[0]);
    assert_eq!(record.status, TaskStatus::Running);
    assert_eq!(record.attempt_count, 1);

    // After the backoff elapses the agent finishes normally.
    fake.append(&format!("{MARKER}\n"));
    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);

    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Completed);
    assert!(store
        .read::<WaitCheckpoint>(CheckpointScope::Wait)
        .expect("read wait")
        .is_none());
}

#[tokio::test]
async fn dead_session_is_restarted_and_payload_resent() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["resilient task"]);
    let fake = FakeMultiplexer::alive();
    let store = CheckpointStore::open(dir.path()).expect("open store");
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "payload dispatched").await;
    fake.set_alive(false);

    // The restart comes back healthy and the payload is replayed.
    wait_for(|| fake.sent().len() == 2, "payload resent after restart").await;
    assert_eq!(fake.killed(), 1);
    assert_eq!(fake.sent()[1], "resilient task");
    let churn = store
        .read::<SessionCheckpoint>(CheckpointScope::Session)
        .expect("read session")
        .expect("session checkpoint present");
    assert_eq!(churn.restart_count, 1);

    fake.append(&format!("{MARKER}\n"));
    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);
    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Completed);

    // Completion resets the recorded restart churn.
    let after = store
        .read::<SessionCheckpoint>(CheckpointScope::Session)
        .expect("read session")
        .expect("session checkpoint present");
    assert_eq!(after.restart_count, 0);
}

#[tokio::test]
async fn repeated_crashes_fail_the_task_and_move_on() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 1, &["crashing task", "healthy task"]);
    let fake = FakeMultiplexer::alive();
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 1),
        1,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "first payload dispatched").await;
    // The session dies and its one allowed restart comes up dead too;
    // the recreation after the task is failed comes up healthy.
    fake.set_dead_creates(1);
    fake.set_alive(false);

    wait_for(
        || fake.sent().iter().any(|s| s == "healthy task"),
        "second task dispatched",
    )
    .await;
    fake.append(&format!("{MARKER}\n"));

    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);

    let failed = task(dir.path(), &ids[0]);
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert!(failed
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("crashed")));

    assert_eq!(task(dir.path(), &ids[1]).status, TaskStatus::Completed);
}

#[tokio::test]
async fn rate_limit_wait_does_not_consume_the_task_budget() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["throttled work"]);
    let fake = FakeMultiplexer::alive();
    let store = CheckpointStore::open(dir.path()).expect("open store");
    // Budget far shorter than the throttle window; the wait must not be
    // billed against the attempt.
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(Some(Duration::from_millis(400)), 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "payload dispatched").await;
    fake.append("retry in 1 second\n");

    wait_for(|| read_wait(&store).is_some(), "wait checkpoint written").await;
    wait_for(|| read_wait(&store).is_none(), "wait elapsed").await;

    // Still running: the one-second throttle did not overrun the budget.
    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Running);

    fake.append(&format!("{MARKER}\n"));
    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);
    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Completed);
}

#[tokio::test]
async fn crash_requeue_with_an_elapsed_budget_does_not_abort() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 2, &["fragile work"]);
    let fake = FakeMultiplexer::alive();
    // Slow poll so the crash is detected in the same iteration the first
    // attempt's budget lapses; zero restart tolerance requeues it there.
    let slow = MonitorSettings {
        poll_interval: Duration::from_millis(120),
        completion_marker: MARKER.to_owned(),
        task_timeout: Some(Duration::from_millis(200)),
        max_restarts: 0,
        heartbeat_interval: Duration::from_millis(40),
    };
    let monitor = build_monitor(dir.path(), fake.clone(), slow, 2, BACKOFF, CancellationToken::new());
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "payload dispatched").await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    fake.set_alive(false);

    // The requeued task gets a fresh attempt with a fresh budget clock.
    wait_for(|| fake.sent().len() == 2, "second attempt dispatched").await;
    fake.append(&format!("{MARKER}\n"));

    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);

    let record = task(dir.path(), &ids[0]);
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.attempt_count, 2);
}

#[tokio::test]
async fn a_new_throttle_event_replaces_the_pending_wait() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["patient work"]);
    let fake = FakeMultiplexer::alive();
    let store = CheckpointStore::open(dir.path()).expect("open store");
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "payload dispatched").await;
    fake.append("retry in 1 second\n");
    wait_for(|| read_wait(&store).is_some(), "first wait checkpoint").await;
    let first = read_wait(&store).expect("first wait present");
    assert_eq!(first.pattern_kind, PatternKind::RelativeDuration);

    // A second throttle arrives while the first wait is still owed.
    fake.append("usage limit exceeded\n");
    wait_for(
        || matches!(read_wait(&store), Some(w) if w.pattern_kind == PatternKind::GenericExceeded),
        "second wait checkpoint replaces the first",
    )
    .await;

    let second = read_wait(&store).expect("second wait present");
    assert_eq!(second.raw_text, "usage limit exceeded");
    assert!(second.written_at > first.written_at);
    // The new checkpoint carries the new event's own window, not the old
    // wait extended by it.
    let window = second.resume_at - second.written_at;
    assert!(window <= chrono::Duration::milliseconds(350), "window {window}");
    assert!(window >= chrono::Duration::milliseconds(250), "window {window}");

    fake.append(&format!("{MARKER}\n"));
    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);
    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Completed);
}

#[tokio::test]
async fn marker_and_throttle_in_one_chunk_complete_then_wait() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["first", "second"]);
    let fake = FakeMultiplexer::alive();
    let store = CheckpointStore::open(dir.path()).expect("open store");
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "first payload dispatched").await;
    // The agent finishes the task and gets throttled in the same chunk.
    fake.append(&format!("{MARKER}\nusage limit exceeded\n"));

    wait_for(|| read_wait(&store).is_some(), "wait checkpoint written").await;
    // The completion was not swallowed by the classify branch.
    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Completed);

    wait_for(
        || fake.sent().get(1).map(String::as_str) == Some("second"),
        "second task dispatched after the wait",
    )
    .await;
    fake.append(&format!("{MARKER}\n"));

    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);
    assert_eq!(task(dir.path(), &ids[1]).status, TaskStatus::Completed);
}

#[tokio::test]
async fn task_budget_overrun_times_the_task_out() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["stuck task"]);
    let fake = FakeMultiplexer::alive();
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(Some(Duration::from_millis(100)), 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    // Never print the marker; the budget lapses instead.
    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);

    let record = task(dir.path(), &ids[0]);
    assert_eq!(record.status, TaskStatus::Timeout);
    assert!(record.last_error.is_some());
}

#[tokio::test]
async fn cancellation_stops_an_idle_monitor() {
    let dir = TempDir::new().expect("temp dir");
    seed_tasks(dir.path(), 3, &["never finished"]);
    let fake = FakeMultiplexer::alive();
    let cancel = CancellationToken::new();
    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 3),
        3,
        BACKOFF,
        cancel.clone(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "payload dispatched").await;
    cancel.cancel();

    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::Cancelled);
}

#[tokio::test]
async fn stale_marker_from_a_previous_run_is_ignored() {
    let dir = TempDir::new().expect("temp dir");
    let ids = seed_tasks(dir.path(), 3, &["fresh task"]);
    let fake = FakeMultiplexer::alive();
    // Pane still shows a marker printed before this supervisor started.
    fake.append(&format!("old output\n{MARKER}\n"));

    let monitor = build_monitor(
        dir.path(),
        fake.clone(),
        settings(None, 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );
    let handle = tokio::spawn(monitor.run());

    wait_for(|| !fake.sent().is_empty(), "payload dispatched").await;
    // The task must still be running: the stale marker was baselined away.
    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Running);

    fake.append(&format!("{MARKER}\n"));
    let outcome = handle.await.expect("join").expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);
    assert_eq!(task(dir.path(), &ids[0]).status, TaskStatus::Completed);
}

#[tokio::test]
async fn empty_queue_drains_immediately() {
    let dir = TempDir::new().expect("temp dir");
    let fake = FakeMultiplexer::alive();
    let monitor = build_monitor(
        dir.path(),
        fake,
        settings(None, 3),
        3,
        BACKOFF,
        CancellationToken::new(),
    );

    let outcome = monitor.run().await.expect("monitor result");
    assert_eq!(outcome, MonitorOutcome::QueueDrained);
}
