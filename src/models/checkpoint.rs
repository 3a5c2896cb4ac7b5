//! Checkpoint records persisted by the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::rate_limit::PatternKind;

/// What a checkpoint record describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointScope {
    /// A pending rate-limit wait.
    Wait,
    /// The queue cursor (which task is active).
    Queue,
    /// Session identity and restart counters.
    Session,
}

impl CheckpointScope {
    /// File name for this scope inside the checkpoints directory.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Wait => "wait.json",
            Self::Queue => "queue.json",
            Self::Session => "session.json",
        }
    }
}

/// Persisted record of an in-flight rate-limit wait.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WaitCheckpoint {
    /// When the supervisor may resume work.
    pub resume_at: DateTime<Utc>,
    /// Which phrasing triggered the wait.
    pub pattern_kind: PatternKind,
    /// Matched snippet, for the status surface.
    pub raw_text: String,
    /// When the checkpoint was written.
    pub written_at: DateTime<Utc>,
}

/// Persisted queue cursor, written after every task transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueCheckpoint {
    /// The task currently `running`, if any.
    pub active_task: Option<String>,
    /// When the checkpoint was written.
    pub written_at: DateTime<Utc>,
}

/// Persisted session identity and restart state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionCheckpoint {
    /// Multiplexer session name.
    pub session_name: String,
    /// Consecutive restarts for the current task.
    pub restart_count: u32,
    /// When the checkpoint was written.
    pub written_at: DateTime<Utc>,
}
