//! Supervisor lock with heartbeat-based staleness detection.
//!
//! Multiple supervisor instances may be started against the same state
//! directory; only the lock holder may mutate the queue. The lock is a
//! file created with `create_new` (the atomicity point) containing a
//! [`LockRecord`]. A holder refreshes `heartbeat_at` every loop
//! iteration; a record whose heartbeat is older than the staleness
//! threshold is considered abandoned and may be reclaimed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{AppError, Result};

/// File name of the lock inside the state directory.
const LOCK_FILE: &str = "supervisor.lock";

/// On-disk record identifying the current lock holder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LockRecord {
    /// Unique identifier for the holding instance.
    pub instance_id: Uuid,
    /// Holder's process id, for diagnostics.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Last liveness refresh.
    pub heartbeat_at: DateTime<Utc>,
}

impl LockRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            instance_id: Uuid::new_v4(),
            pid: std::process::id(),
            acquired_at: now,
            heartbeat_at: now,
        }
    }

    /// Whether the holder's heartbeat is older than the staleness threshold.
    #[must_use]
    pub fn is_stale(&self, staleness: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(staleness) {
            Ok(threshold) => now - self.heartbeat_at > threshold,
            Err(_) => false,
        }
    }
}

/// Exclusive ownership of queue mutation for one supervisor instance.
///
/// Dropping the guard releases the lock, but only if the on-disk record
/// still carries this instance's id (a reclaiming instance must not lose
/// its freshly acquired lock to a stale holder's cleanup).
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    record: LockRecord,
}

impl LockGuard {
    /// Acquire the supervisor lock for a state directory.
    ///
    /// If the lock file already exists, its heartbeat is inspected: a
    /// stale or unreadable record is forcibly reclaimed, a live one
    /// yields `LockConflict`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockConflict` if another live instance holds
    /// the lock, or `AppError::Io` on file-system failure.
    pub fn acquire(state_dir: &Path, staleness: Duration) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .map_err(|err| AppError::Io(format!("cannot create state dir: {err}")))?;
        let path = state_dir.join(LOCK_FILE);

        // Two passes: the second runs only after a stale lock was removed.
        for reclaimed in [false, true] {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let record = LockRecord::new();
                    let raw = serde_json::to_string_pretty(&record)
                        .map_err(|err| AppError::Io(format!("cannot encode lock: {err}")))?;
                    file.write_all(raw.as_bytes())
                        .map_err(|err| AppError::Io(format!("cannot write lock: {err}")))?;
                    info!(
                        instance_id = %record.instance_id,
                        pid = record.pid,
                        reclaimed,
                        "supervisor lock acquired"
                    );
                    return Ok(Self { path, record });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_record(&path)? {
                        Some(existing) if !existing.is_stale(staleness, Utc::now()) => {
                            return Err(AppError::LockConflict(format!(
                                "held by pid {} since {}",
                                existing.pid, existing.acquired_at
                            )));
                        }
                        Some(existing) => {
                            warn!(
                                pid = existing.pid,
                                heartbeat_at = %existing.heartbeat_at,
                                "reclaiming stale supervisor lock"
                            );
                        }
                        None => {
                            warn!("reclaiming unreadable supervisor lock");
                        }
                    }
                    if reclaimed {
                        // Second failure after a reclaim: another instance won the race.
                        return Err(AppError::LockConflict(
                            "lock re-acquired by a concurrent instance".into(),
                        ));
                    }
                    fs::remove_file(&path)
                        .map_err(|err| AppError::Io(format!("cannot remove stale lock: {err}")))?;
                }
                Err(err) => return Err(AppError::Io(format!("cannot create lock: {err}"))),
            }
        }

        Err(AppError::LockConflict("lock acquisition raced".into()))
    }

    /// Refresh the liveness heartbeat, rewriting the record atomically.
    ///
    /// Verifies the on-disk record still carries this instance's id
    /// first: a holder that overslept its staleness window must observe
    /// the reclaim instead of clobbering the new holder's record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockConflict` if the lock has been reclaimed by
    /// another instance, `AppError::Checkpoint` if the record cannot be
    /// rewritten; the caller must treat either as fatal.
    pub fn refresh_heartbeat(&mut self) -> Result<()> {
        let still_ours = matches!(
            read_record(&self.path)?,
            Some(on_disk) if on_disk.instance_id == self.record.instance_id
        );
        if !still_ours {
            return Err(AppError::LockConflict(
                "lock reclaimed by another instance".into(),
            ));
        }
        self.record.heartbeat_at = Utc::now();
        let parent = self
            .path
            .parent()
            .ok_or_else(|| AppError::Checkpoint("lock path has no parent".into()))?;
        let tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::Checkpoint(format!("cannot create temp lock: {err}")))?;
        serde_json::to_writer_pretty(&tmp, &self.record)
            .map_err(|err| AppError::Checkpoint(format!("cannot encode lock: {err}")))?;
        tmp.persist(&self.path)
            .map_err(|err| AppError::Checkpoint(format!("cannot replace lock: {err}")))?;
        Ok(())
    }

    /// The record this guard wrote on acquisition.
    #[must_use]
    pub fn record(&self) -> &LockRecord {
        &self.record
    }
}

impl Drop for LockGuard {
    /// Best-effort release: remove the lock file if it is still ours.
    fn drop(&mut self) {
        if let Ok(Some(on_disk)) = read_record(&self.path) {
            if on_disk.instance_id == self.record.instance_id {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

/// Read the lock record for a state directory without acquiring it.
///
/// Used by the read-only status surface. `None` when no lock exists or
/// the file cannot be parsed.
///
/// # Errors
///
/// Returns `AppError::Io` if the file exists but cannot be read.
pub fn read_lock(state_dir: &Path) -> Result<Option<LockRecord>> {
    read_record(&state_dir.join(LOCK_FILE))
}

fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(AppError::Io(format!("cannot read lock: {err}"))),
    };
    Ok(serde_json::from_str(&raw).ok())
}
