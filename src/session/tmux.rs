//! Tmux implementation of the [`Multiplexer`] trait.
//!
//! Shells out to the `tmux` binary: `new-session -d` to start the agent,
//! `has-session` for liveness, `send-keys` for input injection, and
//! `capture-pane -p` for output snapshots. The session stays attachable
//! from any terminal with `tmux attach-session -t <name>`.

use tokio::process::Command;
use tracing::debug;

use crate::session::{BoxFuture, Multiplexer};
use crate::{AppError, Result};

/// Lines of scrollback included in each pane capture.
const CAPTURE_HISTORY_LINES: u32 = 200;

/// Tmux-backed multiplexer.
#[derive(Debug, Clone, Default)]
pub struct TmuxMultiplexer;

impl TmuxMultiplexer {
    /// Construct a tmux multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Check whether the tmux binary is available.
    pub async fn available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn run(args: &[&str]) -> Result<std::process::Output> {
        debug!(?args, "tmux");
        Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|err| AppError::Session(format!("tmux {}: {err}", args.join(" "))))
    }

    async fn run_checked(args: &[&str]) -> Result<()> {
        let out = Self::run(args).await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(AppError::Session(format!(
                "tmux {} exited with {}: {}",
                args.join(" "),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )))
        }
    }
}

impl Multiplexer for TmuxMultiplexer {
    fn create(&self, name: &str, command: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_owned();
        let command = command.to_owned();
        Box::pin(async move {
            // Remove any stale session with this name first.
            let _ = Self::run(&["kill-session", "-t", &name]).await;
            Self::run_checked(&[
                "new-session", "-d", "-s", &name, "-x", "200", "-y", "50", &command,
            ])
            .await
        })
    }

    fn exists(&self, name: &str) -> BoxFuture<'_, Result<bool>> {
        let name = name.to_owned();
        Box::pin(async move {
            let out = Self::run(&["has-session", "-t", &name]).await?;
            Ok(out.status.success())
        })
    }

    fn send_keys(&self, name: &str, text: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            // -l sends the text literally; Enter is a separate key event so
            // the hosted TUI sees a submit rather than a trailing newline.
            Self::run_checked(&["send-keys", "-t", &name, "-l", &text]).await?;
            Self::run_checked(&["send-keys", "-t", &name, "Enter"]).await
        })
    }

    fn capture_pane(&self, name: &str) -> BoxFuture<'_, Result<String>> {
        let name = name.to_owned();
        Box::pin(async move {
            let history = format!("-{CAPTURE_HISTORY_LINES}");
            let out = Self::run(&["capture-pane", "-p", "-t", &name, "-S", &history]).await?;
            if out.status.success() {
                Ok(String::from_utf8_lossy(&out.stdout).into_owned())
            } else {
                Err(AppError::Session(format!(
                    "tmux capture-pane exited with {}",
                    out.status
                )))
            }
        })
    }

    fn kill(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_owned();
        Box::pin(async move {
            // kill-session fails when the session is already gone; that is
            // the desired end state, not an error.
            let _ = Self::run(&["kill-session", "-t", &name]).await?;
            Ok(())
        })
    }
}
