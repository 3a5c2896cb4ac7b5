//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Multiplexer session settings for the supervised agent.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Name of the tmux session hosting the agent.
    #[serde(default = "default_session_name")]
    pub name: String,
    /// Command started inside the session (the agent CLI).
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
}

fn default_session_name() -> String {
    "warden-agent".into()
}

fn default_agent_command() -> String {
    "claude".into()
}

/// Monitor loop cadence and task budget settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Interval between output polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Sentinel string the agent prints when a task is done.
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    /// Wall-clock budget per running task; 0 disables the budget.
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    /// Maximum consecutive session restarts before the task is failed.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_completion_marker() -> String {
    "TASK COMPLETE".into()
}

fn default_task_timeout_seconds() -> u64 {
    3600
}

fn default_max_restarts() -> u32 {
    3
}

/// Rate-limit classification settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackoffConfig {
    /// Wait applied when a limit phrase carries no explicit time.
    #[serde(default = "default_backoff_seconds")]
    pub default_backoff_seconds: u64,
    /// Fixed offset from UTC used to interpret clock-time phrasings.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_backoff_seconds() -> u64 {
    300
}

/// Task retry policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Maximum attempts per task before a failure becomes permanent.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

/// Supervisor lock liveness settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// Heartbeat age after which a lock is considered abandoned.
    #[serde(default = "default_staleness_seconds")]
    pub staleness_seconds: u64,
}

fn default_staleness_seconds() -> u64 {
    90
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the queue, checkpoints, and lock file.
    pub state_dir: PathBuf,
    /// Session settings.
    #[serde(default = "default_session_config")]
    pub session: SessionConfig,
    /// Monitor loop settings.
    #[serde(default = "default_monitor_config")]
    pub monitor: MonitorConfig,
    /// Rate-limit backoff settings.
    #[serde(default = "default_backoff_config")]
    pub backoff: BackoffConfig,
    /// Queue retry policy.
    #[serde(default = "default_queue_config")]
    pub queue: QueueConfig,
    /// Lock staleness thresholds.
    #[serde(default = "default_lock_config")]
    pub lock: LockConfig,
}

fn default_session_config() -> SessionConfig {
    SessionConfig {
        name: default_session_name(),
        agent_command: default_agent_command(),
    }
}

fn default_monitor_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval_ms: default_poll_interval_ms(),
        completion_marker: default_completion_marker(),
        task_timeout_seconds: default_task_timeout_seconds(),
        max_restarts: default_max_restarts(),
    }
}

fn default_backoff_config() -> BackoffConfig {
    BackoffConfig {
        default_backoff_seconds: default_backoff_seconds(),
        utc_offset_minutes: 0,
    }
}

fn default_queue_config() -> QueueConfig {
    QueueConfig {
        max_attempts: default_max_attempts(),
    }
}

fn default_lock_config() -> LockConfig {
    LockConfig {
        staleness_seconds: default_staleness_seconds(),
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between output polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    /// Wall-clock budget per running task; `None` when disabled.
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        if self.monitor.task_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.monitor.task_timeout_seconds))
        }
    }

    /// Default backoff applied to generic limit phrases.
    #[must_use]
    pub fn default_backoff(&self) -> Duration {
        Duration::from_secs(self.backoff.default_backoff_seconds)
    }

    /// Heartbeat age after which the supervisor lock may be reclaimed.
    #[must_use]
    pub fn lock_staleness(&self) -> Duration {
        Duration::from_secs(self.lock.staleness_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.session.name.trim().is_empty() {
            return Err(AppError::Config("session.name must not be empty".into()));
        }
        if self.session.agent_command.trim().is_empty() {
            return Err(AppError::Config(
                "session.agent_command must not be empty".into(),
            ));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "monitor.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.monitor.completion_marker.trim().is_empty() {
            return Err(AppError::Config(
                "monitor.completion_marker must not be empty".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(AppError::Config(
                "queue.max_attempts must be greater than zero".into(),
            ));
        }
        if self.lock.staleness_seconds == 0 {
            return Err(AppError::Config(
                "lock.staleness_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
