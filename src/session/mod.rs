//! Terminal-multiplexer session abstraction and controller.
//!
//! The [`Multiplexer`] trait decouples the supervision core from the
//! concrete multiplexer (tmux in production, a scripted fake in tests).
//! The multiplexer is authoritative for session liveness and output.

pub mod controller;
pub mod tmux;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Boxed future alias for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Narrow interface over a terminal multiplexer.
pub trait Multiplexer: Send + Sync {
    /// Create a detached session running `command`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the
    /// session cannot be created.
    fn create(&self, name: &str, command: &str) -> BoxFuture<'_, Result<()>>;

    /// Whether a session with this name currently exists.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the
    /// multiplexer cannot be queried.
    fn exists(&self, name: &str) -> BoxFuture<'_, Result<bool>>;

    /// Type `text` into the session and press Enter.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the
    /// keys cannot be delivered.
    fn send_keys(&self, name: &str, text: &str) -> BoxFuture<'_, Result<()>>;

    /// Capture the session's visible pane content as a text snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the
    /// pane cannot be captured.
    fn capture_pane(&self, name: &str) -> BoxFuture<'_, Result<String>>;

    /// Tear down the session, tolerating absence.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the
    /// kill command itself fails to run.
    fn kill(&self, name: &str) -> BoxFuture<'_, Result<()>>;
}
