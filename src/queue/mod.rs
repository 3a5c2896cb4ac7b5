//! Task queue engine: ordered work items and their state transitions.

pub mod engine;
