//! Task model and queue state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a queued work item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be picked up.
    Pending,
    /// Currently being driven through the agent.
    Running,
    /// Finished successfully; terminal.
    Completed,
    /// Failed; terminal unless explicitly retried.
    Failed,
    /// Exceeded its wall-clock budget; terminal unless explicitly retried.
    Timeout,
}

impl TaskStatus {
    /// Whether this status is terminal absent an explicit retry.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

/// A single work item driven through the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Unique record identifier; immutable.
    pub id: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Opaque instruction text sent to the agent.
    pub payload: String,
    /// Creation timestamp; orders the queue.
    pub created_at: DateTime<Utc>,
    /// First time the task entered `running`; set once.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal success state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times the task has entered `running`.
    pub attempt_count: u32,
    /// Present only when status is `failed` or `timeout`.
    pub last_error: Option<String>,
}

impl Task {
    /// Construct a new pending task with a generated identifier.
    #[must_use]
    pub fn new(payload: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            payload,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `completed` is terminal with no transitions out; `failed` and
    /// `timeout` may re-enter `pending` only through an explicit retry.
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self.status, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (
                    TaskStatus::Running,
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
                )
                | (TaskStatus::Failed | TaskStatus::Timeout, TaskStatus::Pending)
        )
    }
}
