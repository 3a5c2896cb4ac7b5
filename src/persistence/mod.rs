//! On-disk persistence: checkpoint store, supervisor lock, task records.
//!
//! Every write in this module is temp-file-then-atomic-rename so a crash
//! mid-write never leaves a partial record observable by any reader.

pub mod lock;
pub mod queue_repo;
pub mod store;
