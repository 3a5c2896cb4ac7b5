#![forbid(unsafe_code)]

//! Supervision engine for a rate-limited interactive CLI agent.
//!
//! Watches an agent running inside a terminal-multiplexer session,
//! classifies rate-limit throttling in its output, checkpoints a resume
//! time, and drives a persistent task queue through the agent one item
//! at a time under a single-writer lock discipline.

pub mod classifier;
pub mod config;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod queue;
pub mod session;
pub mod status;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
