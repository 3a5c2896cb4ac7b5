//! The monitor control loop.
//!
//! Single cooperative loop per supervisor instance, one iteration per
//! poll cycle: refresh the lock heartbeat, honor any pending rate-limit
//! wait, classify fresh agent output, react to completion markers and
//! session crashes, and drive the task queue until it drains. All
//! blocking points are interruptible through a [`CancellationToken`] and
//! every state change is persisted before the loop moves on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::classifier::Classifier;
use crate::models::checkpoint::{CheckpointScope, SessionCheckpoint, WaitCheckpoint};
use crate::models::rate_limit::RateLimitEvent;
use crate::models::task::Task;
use crate::persistence::store::CheckpointStore;
use crate::queue::engine::TaskQueue;
use crate::session::controller::SessionController;
use crate::session::Multiplexer;
use crate::Result;

/// Monitor loop tuning, derived from [`GlobalConfig`](crate::GlobalConfig).
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Interval between output polls.
    pub poll_interval: Duration,
    /// Sentinel the agent prints when a task is done.
    pub completion_marker: String,
    /// Wall-clock budget per running task; `None` disables the budget.
    pub task_timeout: Option<Duration>,
    /// Consecutive session restarts tolerated before the task is failed.
    pub max_restarts: u32,
    /// Interval between lock heartbeat refreshes during long waits.
    pub heartbeat_interval: Duration,
}

/// How the monitor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The queue has no pending or running tasks left.
    QueueDrained,
    /// A shutdown was requested through the cancellation token.
    Cancelled,
}

/// The supervision loop tying classifier, queue, and session together.
pub struct Monitor<M: Multiplexer> {
    queue: TaskQueue,
    session: SessionController<M>,
    classifier: Classifier,
    store: CheckpointStore,
    settings: MonitorSettings,
    cancel: CancellationToken,
    /// Budget clock for the current attempt; starts at dispatch and is
    /// shifted past rate-limit waits so throttled time is never billed.
    attempt_started: Option<DateTime<Utc>>,
}

impl<M: Multiplexer> Monitor<M> {
    /// Assemble a monitor from its collaborators.
    #[must_use]
    pub fn new(
        queue: TaskQueue,
        session: SessionController<M>,
        classifier: Classifier,
        store: CheckpointStore,
        settings: MonitorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            session,
            classifier,
            store,
            settings,
            cancel,
            attempt_started: None,
        }
    }

    /// Run the loop to completion.
    ///
    /// Exits cleanly when the queue drains or cancellation is requested.
    ///
    /// # Errors
    ///
    /// Returns an error only for faults that would risk queue/checkpoint
    /// divergence (heartbeat or checkpoint write failure) or an
    /// unrecoverable session fault.
    pub async fn run(mut self) -> Result<MonitorOutcome> {
        let span = info_span!("monitor", session = %self.session.name());
        async {
            self.startup().await?;

            loop {
                if self.cancel.is_cancelled() {
                    info!("monitor cancelled");
                    return Ok(MonitorOutcome::Cancelled);
                }

                // A heartbeat that cannot be persisted is fatal: without
                // it another instance may legitimately reclaim the lock.
                self.queue.refresh_heartbeat()?;

                if let Some(chunk) = self.session.read_output().await? {
                    // Completion first: a chunk can carry both the marker
                    // and a throttle phrase, and a finished task stays
                    // finished regardless of the wait that follows.
                    self.check_completion(&chunk)?;
                    if let Some(event) = self.classifier.classify(&chunk, Utc::now()) {
                        if !self.enter_wait(&event).await? {
                            return Ok(MonitorOutcome::Cancelled);
                        }
                        // The running task's progress is left untouched;
                        // it resumes now that the wait has elapsed.
                        continue;
                    }
                }

                if let Some(task) = self.queue.running()? {
                    self.check_session_health(&task).await?;
                    // The health check may have failed or requeued the
                    // task; only bill the budget while it is still running.
                    if let Some(task) = self.queue.running()? {
                        self.check_task_budget(&task)?;
                    }
                } else if let Some(next) = self.queue.next_pending()? {
                    let task = self.queue.begin(&next.id)?;
                    info!(task_id = %task.id, attempt = task.attempt_count, "dispatching task");
                    self.attempt_started = Some(Utc::now());
                    self.session.send(&task.payload).await?;
                } else {
                    info!("queue drained, exiting");
                    return Ok(MonitorOutcome::QueueDrained);
                }

                tokio::select! {
                    () = self.cancel.cancelled() => return Ok(MonitorOutcome::Cancelled),
                    () = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Startup: ensure the session, baseline its output, recover the
    /// restart counter and any checkpointed wait, and replay a task left
    /// `running` by a crash.
    async fn startup(&mut self) -> Result<()> {
        self.session.ensure_session().await?;
        // Baseline past whatever the pane already shows, so stale markers
        // from a previous run are never re-read as fresh completions.
        self.session.mark_consumed().await?;

        // Crash-escalation progress survives a supervisor restart.
        if let Some(session) = self
            .store
            .read::<SessionCheckpoint>(CheckpointScope::Session)?
        {
            self.session.restore_restarts(session.restart_count);
        }

        if let Some(wait) = self.store.read::<WaitCheckpoint>(CheckpointScope::Wait)? {
            if wait.resume_at <= Utc::now() {
                info!(resume_at = %wait.resume_at, "checkpointed wait already satisfied");
                self.store.clear(CheckpointScope::Wait)?;
            } else {
                info!(resume_at = %wait.resume_at, "re-entering checkpointed wait");
                if !self.sleep_until(wait.resume_at).await? {
                    return Ok(());
                }
                self.store.clear(CheckpointScope::Wait)?;
            }
        }

        if let Some(task) = self.queue.running()? {
            // A running task at startup means the previous instance died
            // mid-flight; replay its payload so the agent picks it up.
            info!(task_id = %task.id, "replaying in-flight task after restart");
            self.attempt_started = Some(Utc::now());
            self.session.send(&task.payload).await?;
        }
        Ok(())
    }

    /// Persist the wait checkpoint, sleep until the resume time, then
    /// clear the checkpoint. Returns `false` when cancelled mid-wait.
    async fn enter_wait(&mut self, event: &RateLimitEvent) -> Result<bool> {
        info!(
            kind = ?event.pattern_kind,
            resume_at = %event.resume_at,
            matched = %event.raw_text,
            "rate limit detected"
        );
        // A newer event overwrites any pending wait rather than stacking.
        self.store.write(
            CheckpointScope::Wait,
            &WaitCheckpoint {
                resume_at: event.resume_at,
                pattern_kind: event.pattern_kind,
                raw_text: event.raw_text.clone(),
                written_at: Utc::now(),
            },
        )?;

        let wait_started = Utc::now();
        if !self.sleep_until(event.resume_at).await? {
            return Ok(false);
        }
        // Throttled time is not the attempt's fault; shift the budget
        // clock so only time the agent could actually work is billed.
        if let Some(started) = self.attempt_started.as_mut() {
            *started += Utc::now() - wait_started;
        }
        self.store.clear(CheckpointScope::Wait)?;
        info!("rate limit wait elapsed, resuming");
        Ok(true)
    }

    /// Scan fresh output for the completion marker.
    fn check_completion(&mut self, chunk: &str) -> Result<()> {
        if !chunk.contains(&self.settings.completion_marker) {
            return Ok(());
        }
        if let Some(task) = self.queue.running()? {
            self.queue.complete(&task.id)?;
            self.session.reset_restarts();
            self.write_session_checkpoint()?;
        }
        Ok(())
    }

    /// Restart a dead session, replaying the task payload; once the
    /// restart budget is exhausted, fail the task and move on.
    async fn check_session_health(&mut self, task: &Task) -> Result<()> {
        if self.session.is_alive().await? {
            return Ok(());
        }

        if self.session.restarts() >= self.settings.max_restarts {
            warn!(
                task_id = %task.id,
                restarts = self.session.restarts(),
                "restart budget exhausted, failing task"
            );
            self.queue.fail(
                &task.id,
                &format!(
                    "session crashed {} consecutive times",
                    self.session.restarts()
                ),
            )?;
            self.session.reset_restarts();
            self.session.ensure_session().await?;
            self.write_session_checkpoint()?;
            return Ok(());
        }

        self.session.restart().await?;
        self.write_session_checkpoint()?;
        self.session.send(&task.payload).await?;
        Ok(())
    }

    /// Persist the session's name and consecutive-restart count so the
    /// status surface can report crash churn.
    fn write_session_checkpoint(&self) -> Result<()> {
        self.store.write(
            CheckpointScope::Session,
            &SessionCheckpoint {
                session_name: self.session.name().to_owned(),
                restart_count: self.session.restarts(),
                written_at: Utc::now(),
            },
        )
    }

    /// Force a `timeout` transition when the current attempt's wall-clock
    /// budget elapsed. The clock starts at dispatch and is shifted past
    /// rate-limit waits, so neither throttled time nor earlier attempts
    /// count against it.
    fn check_task_budget(&self, task: &Task) -> Result<()> {
        let (Some(budget), Some(started)) = (self.settings.task_timeout, self.attempt_started)
        else {
            return Ok(());
        };
        let Ok(budget) = chrono::Duration::from_std(budget) else {
            return Ok(());
        };
        if Utc::now() - started > budget {
            self.queue.timeout(&task.id, "wall-clock budget exceeded")?;
        }
        Ok(())
    }

    /// Interruptible sleep until an absolute time, refreshing the lock
    /// heartbeat each interval so a long wait never looks abandoned.
    /// Returns `Ok(false)` when cancellation fired first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockConflict` if another instance reclaimed the
    /// lock mid-wait.
    async fn sleep_until(&mut self, resume_at: DateTime<Utc>) -> Result<bool> {
        loop {
            let remaining = (resume_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let slice = remaining.min(self.settings.heartbeat_interval);
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(false),
                () = tokio::time::sleep(slice) => {}
            }
            if slice == remaining {
                return Ok(true);
            }
            self.queue.refresh_heartbeat()?;
        }
    }
}
