//! Supervision core: the monitor control loop.

pub mod monitor;
