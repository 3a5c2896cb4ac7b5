//! Task record repository: one JSON file per task.
//!
//! Records live at `<state_dir>/tasks/<id>.json` and are replaced
//! atomically, so external status tooling can read them at any time
//! without holding the supervisor lock.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::models::task::Task;
use crate::{AppError, Result};

/// File-backed repository for task records.
#[derive(Debug, Clone)]
pub struct QueueRepo {
    tasks_dir: PathBuf,
}

impl QueueRepo {
    /// Open (creating if needed) the tasks directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let tasks_dir = state_dir.join("tasks");
        fs::create_dir_all(&tasks_dir)
            .map_err(|err| AppError::Io(format!("cannot create tasks dir: {err}")))?;
        Ok(Self { tasks_dir })
    }

    /// Persist a task record, atomically replacing any prior version.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if serialization or the atomic
    /// replace fails.
    pub fn save(&self, task: &Task) -> Result<()> {
        let target = self.tasks_dir.join(format!("{}.json", task.id));
        let tmp = NamedTempFile::new_in(&self.tasks_dir)
            .map_err(|err| AppError::Checkpoint(format!("cannot create temp record: {err}")))?;
        serde_json::to_writer_pretty(&tmp, task)
            .map_err(|err| AppError::Checkpoint(format!("cannot serialize task: {err}")))?;
        tmp.persist(&target)
            .map_err(|err| AppError::Checkpoint(format!("cannot replace task record: {err}")))?;
        Ok(())
    }

    /// Load a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no record exists for `id`.
    pub fn get(&self, id: &str) -> Result<Task> {
        let path = self.tasks_dir.join(format!("{id}.json"));
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("task {id} not found")));
            }
            Err(err) => return Err(AppError::Io(format!("cannot read task record: {err}"))),
        };
        serde_json::from_str(&raw)
            .map_err(|err| AppError::Checkpoint(format!("corrupt task record {id}: {err}")))
    }

    /// Load every task record, ordered by creation time (ties broken by id).
    ///
    /// Unparseable files are skipped with a warning so a lock-free reader
    /// never fails on a record it merely raced.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be listed.
    pub fn load_all(&self) -> Result<Vec<Task>> {
        let entries = fs::read_dir(&self.tasks_dir)
            .map_err(|err| AppError::Io(format!("cannot list tasks dir: {err}")))?;

        let mut tasks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<Task>(&raw) {
                    Ok(task) => tasks.push(task),
                    Err(err) => {
                        warn!(path = %path.display(), %err, "skipping unparseable task record");
                    }
                },
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable task record");
                }
            }
        }

        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }
}
