//! Queue state transitions under the supervisor lock.
//!
//! [`TaskQueue`] owns the [`LockGuard`] for its whole lifetime, so every
//! mutating operation runs as the exclusive lock holder. Each mutation
//! persists the task record and then the queue checkpoint before the
//! call returns (persist-then-release ordering): a crash can never leave
//! the queue and its checkpoint out of sync in the dangerous direction.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::models::checkpoint::{CheckpointScope, QueueCheckpoint};
use crate::models::task::{Task, TaskStatus};
use crate::persistence::lock::LockGuard;
use crate::persistence::queue_repo::QueueRepo;
use crate::persistence::store::CheckpointStore;
use crate::{AppError, Result};

/// Retry policy applied to failed tasks.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum times a task may enter `running` before a failure sticks.
    pub max_attempts: u32,
}

/// The task queue engine, exclusive mutator of the on-disk queue.
pub struct TaskQueue {
    repo: QueueRepo,
    store: CheckpointStore,
    lock: LockGuard,
    policy: RetryPolicy,
}

impl TaskQueue {
    /// Open the queue for a state directory, acquiring the supervisor lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockConflict` if another live instance holds
    /// the lock, or `AppError::Io` on file-system failure.
    pub fn open(state_dir: &Path, policy: RetryPolicy, lock_staleness: Duration) -> Result<Self> {
        let lock = LockGuard::acquire(state_dir, lock_staleness)?;
        let repo = QueueRepo::open(state_dir)?;
        let store = CheckpointStore::open(state_dir)?;
        Ok(Self {
            repo,
            store,
            lock,
            policy,
        })
    }

    /// Refresh the supervisor lock heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockConflict` if another instance has reclaimed
    /// the lock, `AppError::Checkpoint` if the lock record cannot be
    /// rewritten; fatal either way.
    pub fn refresh_heartbeat(&mut self) -> Result<()> {
        self.lock.refresh_heartbeat()
    }

    /// Create a new pending task at the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if the record cannot be persisted.
    pub fn enqueue(&self, payload: &str) -> Result<Task> {
        let task = Task::new(payload.to_owned());
        self.repo.save(&task)?;
        self.write_queue_checkpoint()?;
        info!(task_id = %task.id, "task enqueued");
        Ok(task)
    }

    /// The earliest-created pending task, if any. Does not mutate state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the queue cannot be read.
    pub fn next_pending(&self) -> Result<Option<Task>> {
        Ok(self
            .repo
            .load_all()?
            .into_iter()
            .find(|t| t.status == TaskStatus::Pending))
    }

    /// The task currently `running`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the queue cannot be read.
    pub fn running(&self) -> Result<Option<Task>> {
        Ok(self
            .repo
            .load_all()?
            .into_iter()
            .find(|t| t.status == TaskStatus::Running))
    }

    /// Whether the queue has no pending or running work left.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the queue cannot be read.
    pub fn is_drained(&self) -> Result<bool> {
        Ok(self
            .repo
            .load_all()?
            .iter()
            .all(|t| t.status.is_terminal()))
    }

    /// Load a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.repo.get(id)
    }

    /// Transition a pending task to `running`.
    ///
    /// Enforces the single-active-task invariant: fails with `Conflict`
    /// if any task is already running. Sets `started_at` on the first
    /// attempt only and increments `attempt_count`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` on an invariant or state-machine
    /// violation, `AppError::Checkpoint` if persistence fails.
    pub fn begin(&self, id: &str) -> Result<Task> {
        let span = info_span!("begin_task", task_id = id);
        let _guard = span.enter();

        if let Some(active) = self.running()? {
            return Err(AppError::Conflict(format!(
                "task {} is already running",
                active.id
            )));
        }

        let mut task = self.repo.get(id)?;
        if !task.can_transition_to(TaskStatus::Running) {
            return Err(AppError::Conflict(format!(
                "task {id} is not pending (status {:?})",
                task.status
            )));
        }

        task.status = TaskStatus::Running;
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        task.attempt_count += 1;
        self.repo.save(&task)?;
        self.write_queue_checkpoint()?;

        info!(attempt = task.attempt_count, "task running");
        Ok(task)
    }

    /// Transition a running task to `completed`.
    ///
    /// Idempotent: completing an already-completed task is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the task is neither running nor
    /// completed, `AppError::Checkpoint` if persistence fails.
    pub fn complete(&self, id: &str) -> Result<Task> {
        let mut task = self.repo.get(id)?;
        if task.status == TaskStatus::Completed {
            return Ok(task);
        }
        if !task.can_transition_to(TaskStatus::Completed) {
            return Err(AppError::Conflict(format!(
                "task {id} is not running (status {:?})",
                task.status
            )));
        }

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.last_error = None;
        self.repo.save(&task)?;
        self.write_queue_checkpoint()?;

        info!(task_id = id, "task completed");
        Ok(task)
    }

    /// Record a failure for a running task.
    ///
    /// While the attempt budget allows, the task is auto-requeued to
    /// `pending` (attempt count preserved); once the budget is exhausted
    /// it stays `failed` permanently with `last_error` populated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the task is not running,
    /// `AppError::Checkpoint` if persistence fails.
    pub fn fail(&self, id: &str, error: &str) -> Result<Task> {
        let mut task = self.repo.get(id)?;
        if !task.can_transition_to(TaskStatus::Failed) {
            return Err(AppError::Conflict(format!(
                "task {id} is not running (status {:?})",
                task.status
            )));
        }

        if task.attempt_count < self.policy.max_attempts {
            warn!(
                task_id = id,
                attempt = task.attempt_count,
                error,
                "task failed, requeueing"
            );
            task.status = TaskStatus::Pending;
            task.last_error = None;
        } else {
            warn!(
                task_id = id,
                attempt = task.attempt_count,
                error,
                "task failed permanently"
            );
            task.status = TaskStatus::Failed;
            task.last_error = Some(error.to_owned());
        }
        self.repo.save(&task)?;
        self.write_queue_checkpoint()?;
        Ok(task)
    }

    /// Force-transition a running task whose wall-clock budget elapsed.
    ///
    /// Distinct from [`fail`](Self::fail) so callers can apply a
    /// different retry policy; timed-out tasks are never auto-requeued.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the task is not running,
    /// `AppError::Checkpoint` if persistence fails.
    pub fn timeout(&self, id: &str, error: &str) -> Result<Task> {
        let mut task = self.repo.get(id)?;
        if !task.can_transition_to(TaskStatus::Timeout) {
            return Err(AppError::Conflict(format!(
                "task {id} is not running (status {:?})",
                task.status
            )));
        }

        task.status = TaskStatus::Timeout;
        task.last_error = Some(error.to_owned());
        self.repo.save(&task)?;
        self.write_queue_checkpoint()?;

        warn!(task_id = id, error, "task timed out");
        Ok(task)
    }

    /// Explicitly requeue a failed or timed-out task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the task is not in a retryable
    /// state or its attempt budget is exhausted.
    pub fn retry(&self, id: &str) -> Result<Task> {
        let mut task = self.repo.get(id)?;
        if !task.can_transition_to(TaskStatus::Pending) {
            return Err(AppError::Conflict(format!(
                "task {id} is not retryable (status {:?})",
                task.status
            )));
        }
        if task.attempt_count >= self.policy.max_attempts {
            return Err(AppError::Conflict(format!(
                "task {id} exhausted its attempt budget ({})",
                task.attempt_count
            )));
        }

        task.status = TaskStatus::Pending;
        task.last_error = None;
        self.repo.save(&task)?;
        self.write_queue_checkpoint()?;

        info!(task_id = id, "task requeued for retry");
        Ok(task)
    }

    fn write_queue_checkpoint(&self) -> Result<()> {
        let active_task = self.running()?.map(|t| t.id);
        self.store.write(
            CheckpointScope::Queue,
            &QueueCheckpoint {
                active_task,
                written_at: Utc::now(),
            },
        )
    }
}
