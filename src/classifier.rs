//! Rate-limit pattern classifier.
//!
//! Maps a chunk of agent output to an optional [`RateLimitEvent`] with a
//! computed resume time. Classification is pure: identical `text` and
//! `now` always produce the same result. Three phrasings are recognized,
//! in descending priority:
//!
//! 1. Explicit clock time — "blocking until 3pm", "try again at 11:45am"
//! 2. Relative duration — "retry in 45 minutes", "wait 2 hours"
//! 3. Generic exhaustion — "usage limit exceeded" (default backoff)
//!
//! Malformed or ambiguous time expressions yield `None`, never an error:
//! unparseable text simply is not a rate-limit signal.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;

use crate::models::rate_limit::{PatternKind, RateLimitEvent};
use crate::{AppError, Result};

/// Largest relative duration accepted, in seconds (7 days).
const MAX_RELATIVE_SECS: i64 = 7 * 24 * 3600;

/// Compiled rate-limit classifier.
///
/// Construct once from configuration; [`classify`](Self::classify) is then
/// a pure function of its inputs.
pub struct Classifier {
    clock: Regex,
    relative: Regex,
    generic: Regex,
    default_backoff: Duration,
    offset: FixedOffset,
}

impl Classifier {
    /// Build a classifier with the given default backoff and the fixed
    /// UTC offset used to interpret clock-time phrasings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `utc_offset_minutes` is out of range.
    pub fn new(default_backoff: Duration, utc_offset_minutes: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .ok_or_else(|| AppError::Config("utc_offset_minutes out of range".into()))?;
        Ok(Self {
            clock: compile(
                r"(?i)(?:blocking\s+until|blocked\s+until|until|try\s+again\s+at|resets?\s+at|available\s+at)\s+(\d{1,2})(?::([0-5]\d))?\s*(am|pm)?\b",
            )?,
            relative: compile(
                r"(?i)(?:retry|try\s+again|wait|resume|available)\s+(?:in\s+)?(\d{1,6})\s*(seconds?|secs?|s|minutes?|mins?|m|hours?|hrs?|h)\b",
            )?,
            generic: compile(r"(?i)(?:usage|rate)\s+limit\s+(?:exceeded|reached|hit)")?,
            default_backoff,
            offset,
        })
    }

    /// Classify a text chunk against the recognized rate-limit phrasings.
    ///
    /// Returns `None` when the text carries no actionable signal. The
    /// returned `resume_at` is always at or after `now`.
    #[must_use]
    pub fn classify(&self, text: &str, now: DateTime<Utc>) -> Option<RateLimitEvent> {
        if let Some(event) = self.classify_clock(text, now) {
            return Some(event);
        }
        if let Some(event) = self.classify_relative(text, now) {
            return Some(event);
        }
        self.classify_generic(text, now)
    }

    /// Explicit clock time: parse hh[:mm][am|pm]; a stated time-of-day
    /// earlier than `now`'s rolls forward to the next calendar day, never
    /// backward.
    fn classify_clock(&self, text: &str, now: DateTime<Utc>) -> Option<RateLimitEvent> {
        let caps = self.clock.captures(text)?;
        let raw_hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .map_or(Some(0), |m| m.as_str().parse().ok())?;
        let meridiem = caps.get(3).map(|m| m.as_str().to_ascii_lowercase());

        let hour = match meridiem.as_deref() {
            Some("am") if (1..=12).contains(&raw_hour) => raw_hour % 12,
            Some("pm") if (1..=12).contains(&raw_hour) => (raw_hour % 12) + 12,
            None if raw_hour <= 23 => raw_hour,
            _ => return None,
        };

        let local_now = now.with_timezone(&self.offset);
        let naive = local_now.date_naive().and_hms_opt(hour, minute, 0)?;
        let mut candidate = naive.and_local_timezone(self.offset).single()?;
        if candidate < local_now {
            candidate += chrono::Duration::days(1);
        }

        Some(RateLimitEvent {
            raw_text: matched_text(&caps),
            pattern_kind: PatternKind::ClockTime,
            resume_at: candidate.with_timezone(&Utc),
        })
    }

    /// Relative duration: `resume_at = now + duration`.
    fn classify_relative(&self, text: &str, now: DateTime<Utc>) -> Option<RateLimitEvent> {
        let caps = self.relative.captures(text)?;
        let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_ascii_lowercase();

        let secs = match unit.chars().next()? {
            's' => amount,
            'm' => amount.checked_mul(60)?,
            'h' => amount.checked_mul(3600)?,
            _ => return None,
        };
        if secs > MAX_RELATIVE_SECS {
            return None;
        }

        Some(RateLimitEvent {
            raw_text: matched_text(&caps),
            pattern_kind: PatternKind::RelativeDuration,
            resume_at: now + chrono::Duration::seconds(secs),
        })
    }

    /// Generic exhaustion phrase with no explicit time: default backoff.
    fn classify_generic(&self, text: &str, now: DateTime<Utc>) -> Option<RateLimitEvent> {
        let matched = self.generic.find(text)?;
        let backoff = chrono::Duration::from_std(self.default_backoff).ok()?;
        Some(RateLimitEvent {
            raw_text: matched.as_str().to_owned(),
            pattern_kind: PatternKind::GenericExceeded,
            resume_at: now + backoff,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| AppError::Config(format!("bad pattern: {err}")))
}

fn matched_text(caps: &regex::Captures<'_>) -> String {
    caps.get(0).map_or_else(String::new, |m| m.as_str().to_owned())
}
