//! Rate-limit event model produced by the pattern classifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which recognized phrasing produced the event.
///
/// Listed in descending specificity; when multiple kinds match the same
/// text the most specific one wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Explicit clock time, e.g. "blocking until 3pm".
    ClockTime,
    /// Relative duration, e.g. "retry in 45 minutes".
    RelativeDuration,
    /// Generic exhaustion phrase with no time, e.g. "usage limit exceeded".
    GenericExceeded,
}

/// A detected rate-limit signal with a computed resume time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitEvent {
    /// The matched snippet, kept for diagnostics.
    pub raw_text: String,
    /// Which phrasing matched.
    pub pattern_kind: PatternKind,
    /// Absolute time when work may resume; always at or after detection.
    pub resume_at: DateTime<Utc>,
}
