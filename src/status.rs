//! Read-only status surface for operational tooling.
//!
//! Everything here reads the on-disk state without acquiring the
//! supervisor lock. Because every write is an atomic whole-file replace,
//! a reader sees at worst a slightly stale but always consistent
//! snapshot.

use std::path::Path;

use serde::Serialize;

use crate::models::checkpoint::{CheckpointScope, SessionCheckpoint, WaitCheckpoint};
use crate::models::task::{Task, TaskStatus};
use crate::persistence::lock::{read_lock, LockRecord};
use crate::persistence::queue_repo::QueueRepo;
use crate::persistence::store::CheckpointStore;
use crate::Result;

/// Point-in-time view of the supervisor's on-disk state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// All task records, in queue order.
    pub tasks: Vec<Task>,
    /// The task currently running, if any.
    pub running: Option<Task>,
    /// A pending rate-limit wait, if any.
    pub wait: Option<WaitCheckpoint>,
    /// Session restart state, if the supervisor has recorded any.
    pub session: Option<SessionCheckpoint>,
    /// The current lock holder, if any.
    pub lock: Option<LockRecord>,
}

impl StatusSnapshot {
    /// Count tasks in a given status.
    #[must_use]
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// Take a lock-free snapshot of a state directory.
///
/// # Errors
///
/// Returns `AppError::Io` if the state directory cannot be read.
pub fn snapshot(state_dir: &Path) -> Result<StatusSnapshot> {
    let repo = QueueRepo::open(state_dir)?;
    let store = CheckpointStore::open(state_dir)?;

    let tasks = repo.load_all()?;
    let running = tasks
        .iter()
        .find(|t| t.status == TaskStatus::Running)
        .cloned();
    let wait = store.read::<WaitCheckpoint>(CheckpointScope::Wait)?;
    let session = store.read::<SessionCheckpoint>(CheckpointScope::Session)?;
    let lock = read_lock(state_dir)?;

    Ok(StatusSnapshot {
        tasks,
        running,
        wait,
        session,
        lock,
    })
}
