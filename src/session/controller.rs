//! Session controller: lifecycle and bounded output reads.
//!
//! Wraps a [`Multiplexer`] with the state the monitor loop needs: the
//! previous pane snapshot (so each poll yields only fresh output) and a
//! consecutive-restart counter for crash escalation.

use tracing::{info, warn};

use crate::session::Multiplexer;
use crate::Result;

/// Controller for one named agent session.
pub struct SessionController<M: Multiplexer> {
    mux: M,
    name: String,
    agent_command: String,
    last_snapshot: String,
    restarts: u32,
}

impl<M: Multiplexer> SessionController<M> {
    /// Construct a controller for a named session.
    #[must_use]
    pub fn new(mux: M, name: String, agent_command: String) -> Self {
        Self {
            mux,
            name,
            agent_command,
            last_snapshot: String::new(),
            restarts: 0,
        }
    }

    /// The logical session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consecutive restarts since the last successful reset.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Reset the consecutive-restart counter (call when a task makes
    /// progress or completes).
    pub fn reset_restarts(&mut self) {
        self.restarts = 0;
    }

    /// Seed the consecutive-restart counter from persisted state so
    /// crash escalation survives a supervisor restart.
    pub fn restore_restarts(&mut self, restarts: u32) {
        self.restarts = restarts;
    }

    /// Ensure the session exists, creating it if necessary.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the multiplexer fails.
    pub async fn ensure_session(&mut self) -> Result<()> {
        if self.mux.exists(&self.name).await? {
            return Ok(());
        }
        info!(session = %self.name, command = %self.agent_command, "creating session");
        self.mux.create(&self.name, &self.agent_command).await?;
        self.last_snapshot.clear();
        Ok(())
    }

    /// Whether the session is currently alive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the multiplexer cannot be queried.
    pub async fn is_alive(&self) -> Result<bool> {
        self.mux.exists(&self.name).await
    }

    /// Send a line of text (payload or command) into the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the keys cannot be delivered.
    pub async fn send(&self, text: &str) -> Result<()> {
        self.mux.send_keys(&self.name, text).await
    }

    /// Read output that appeared since the previous poll.
    ///
    /// Captures a pane snapshot and returns the delta past the previous
    /// snapshot's final non-blank line. Bounded per poll; repeated calls
    /// walk the stream forward.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the pane cannot be captured.
    pub async fn read_output(&mut self) -> Result<Option<String>> {
        let snapshot = self.mux.capture_pane(&self.name).await?;
        let delta = snapshot_delta(&self.last_snapshot, &snapshot);
        self.last_snapshot = snapshot;
        if delta.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(delta))
        }
    }

    /// Baseline the snapshot at the current pane content so previously
    /// visible text (e.g. an old completion marker) is not re-read.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the pane cannot be captured.
    pub async fn mark_consumed(&mut self) -> Result<()> {
        self.last_snapshot = self.mux.capture_pane(&self.name).await?;
        Ok(())
    }

    /// Tear down and recreate the session under the same logical name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if recreation fails.
    pub async fn restart(&mut self) -> Result<()> {
        self.restarts += 1;
        warn!(session = %self.name, restarts = self.restarts, "restarting session");
        self.mux.kill(&self.name).await?;
        self.mux.create(&self.name, &self.agent_command).await?;
        self.last_snapshot.clear();
        Ok(())
    }
}

/// Compute the fresh portion of `cur` relative to `prev`.
///
/// While the capture window has not scrolled, `cur` simply extends
/// `prev` and the delta is the appended tail. Once the window scrolls,
/// `prev`'s final non-blank line is located in `cur` and everything
/// after its last occurrence is new. When the anchor line is gone
/// entirely (cleared screen, restarted session) the whole snapshot is
/// returned.
fn snapshot_delta(prev: &str, cur: &str) -> String {
    if prev.is_empty() {
        return cur.to_owned();
    }
    if cur == prev {
        return String::new();
    }
    if let Some(tail) = cur.strip_prefix(prev) {
        return tail.to_owned();
    }
    let Some(anchor) = prev.lines().rev().find(|l| !l.trim().is_empty()) else {
        return cur.to_owned();
    };
    match cur.rfind(anchor) {
        Some(pos) => cur[pos + anchor.len()..].to_owned(),
        None => cur.to_owned(),
    }
}
