//! Durable checkpoint store with atomic write semantics.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::checkpoint::CheckpointScope;
use crate::{AppError, Result};

/// Scope-keyed JSON checkpoint store under `<state_dir>/checkpoints/`.
///
/// Writes serialize to a temporary file in the same directory, then
/// atomically replace the target, so readers only ever observe the last
/// complete checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (creating if needed) the checkpoint directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let dir = state_dir.join("checkpoints");
        fs::create_dir_all(&dir)
            .map_err(|err| AppError::Io(format!("cannot create checkpoint dir: {err}")))?;
        Ok(Self { dir })
    }

    /// Persist a checkpoint for the given scope, replacing any prior one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if serialization or the atomic
    /// replace fails.
    pub fn write<T: Serialize>(&self, scope: CheckpointScope, state: &T) -> Result<()> {
        let target = self.path(scope);
        let tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|err| AppError::Checkpoint(format!("cannot create temp file: {err}")))?;
        serde_json::to_writer_pretty(&tmp, state)
            .map_err(|err| AppError::Checkpoint(format!("cannot serialize checkpoint: {err}")))?;
        tmp.persist(&target)
            .map_err(|err| AppError::Checkpoint(format!("cannot replace checkpoint: {err}")))?;
        debug!(scope = ?scope, path = %target.display(), "checkpoint written");
        Ok(())
    }

    /// Read the checkpoint for a scope, or `None` if none has been written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if the file exists but cannot be
    /// read or parsed.
    pub fn read<T: DeserializeOwned>(&self, scope: CheckpointScope) -> Result<Option<T>> {
        let target = self.path(scope);
        let raw = match fs::read_to_string(&target) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::Checkpoint(format!(
                    "cannot read checkpoint: {err}"
                )))
            }
        };
        let state = serde_json::from_str(&raw)
            .map_err(|err| AppError::Checkpoint(format!("corrupt checkpoint: {err}")))?;
        Ok(Some(state))
    }

    /// Remove the checkpoint for a scope, tolerating absence.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` on any other removal failure.
    pub fn clear(&self, scope: CheckpointScope) -> Result<()> {
        match fs::remove_file(self.path(scope)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Checkpoint(format!(
                "cannot clear checkpoint: {err}"
            ))),
        }
    }

    /// On-disk path for a scope's checkpoint file.
    #[must_use]
    pub fn path(&self, scope: CheckpointScope) -> PathBuf {
        self.dir.join(scope.file_name())
    }
}
