//! Domain model module declarations.

pub mod checkpoint;
pub mod rate_limit;
pub mod task;
