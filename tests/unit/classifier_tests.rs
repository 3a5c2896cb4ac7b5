//! Unit tests for the rate-limit pattern classifier.
//!
//! Validates the three recognized phrasings, their priority order,
//! day-rollover for clock times, and that malformed or unrelated text
//! yields no event.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use agent_warden::classifier::Classifier;
use agent_warden::models::rate_limit::PatternKind;

const DEFAULT_BACKOFF: Duration = Duration::from_secs(300);

fn classifier() -> Classifier {
    Classifier::new(DEFAULT_BACKOFF, 0).expect("classifier must build")
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

#[test]
fn generic_phrase_uses_default_backoff() {
    let now = at(10, 0);
    let event = classifier()
        .classify("Error: usage limit exceeded", now)
        .expect("must classify");

    assert_eq!(event.pattern_kind, PatternKind::GenericExceeded);
    assert_eq!(event.resume_at, now + chrono::Duration::seconds(300));
}

#[test]
fn generic_phrase_variants_match() {
    let now = at(10, 0);
    let c = classifier();
    for text in [
        "usage limit reached",
        "rate limit exceeded",
        "rate limit hit, backing off",
        "USAGE LIMIT EXCEEDED",
    ] {
        let event = c.classify(text, now).unwrap_or_else(|| {
            panic!("expected a generic event for {text:?}");
        });
        assert_eq!(event.pattern_kind, PatternKind::GenericExceeded);
    }
}

#[test]
fn clock_time_same_day_when_still_ahead() {
    let now = at(10, 0);
    let event = classifier()
        .classify("blocking until 3pm", now)
        .expect("must classify");

    assert_eq!(event.pattern_kind, PatternKind::ClockTime);
    assert_eq!(event.resume_at, at(15, 0));
}

#[test]
fn clock_time_with_minutes() {
    let now = at(9, 0);
    let event = classifier()
        .classify("try again at 11:45am", now)
        .expect("must classify");

    assert_eq!(event.resume_at, at(11, 45));
}

#[test]
fn clock_time_rolls_to_next_day() {
    // Scenario C: "blocking until 2am" at 23:50 resumes 02:00 the next day.
    let now = at(23, 50);
    let event = classifier()
        .classify("blocking until 2am", now)
        .expect("must classify");

    assert_eq!(event.pattern_kind, PatternKind::ClockTime);
    let expected = Utc
        .with_ymd_and_hms(2025, 3, 11, 2, 0, 0)
        .single()
        .expect("valid timestamp");
    assert_eq!(event.resume_at, expected);
    assert!(event.resume_at > now, "resume must never be in the past");
}

#[test]
fn clock_time_24_hour_without_meridiem() {
    let now = at(12, 0);
    let event = classifier()
        .classify("quota resets at 17:30", now)
        .expect("must classify");

    assert_eq!(event.resume_at, at(17, 30));
}

#[test]
fn twelve_am_is_midnight_and_twelve_pm_is_noon() {
    let c = classifier();
    let now = at(1, 0);

    let noon = c.classify("blocked until 12pm", now).expect("noon");
    assert_eq!(noon.resume_at, at(12, 0));

    let midnight = c.classify("blocked until 12am", now).expect("midnight");
    let expected = Utc
        .with_ymd_and_hms(2025, 3, 11, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    assert_eq!(midnight.resume_at, expected);
}

#[test]
fn relative_duration_minutes() {
    let now = at(10, 0);
    let event = classifier()
        .classify("please retry in 45 minutes", now)
        .expect("must classify");

    assert_eq!(event.pattern_kind, PatternKind::RelativeDuration);
    assert_eq!(event.resume_at, now + chrono::Duration::minutes(45));
}

#[test]
fn relative_duration_hours_and_seconds() {
    let c = classifier();
    let now = at(10, 0);

    let hours = c.classify("wait 2 hours", now).expect("hours");
    assert_eq!(hours.resume_at, now + chrono::Duration::hours(2));

    let secs = c.classify("try again in 30 seconds", now).expect("seconds");
    assert_eq!(secs.resume_at, now + chrono::Duration::seconds(30));
}

#[test]
fn clock_time_outranks_relative_and_generic() {
    let now = at(10, 0);
    let event = classifier()
        .classify(
            "usage limit reached, try again at 5pm or retry in 10 minutes",
            now,
        )
        .expect("must classify");

    assert_eq!(event.pattern_kind, PatternKind::ClockTime);
    assert_eq!(event.resume_at, at(17, 0));
}

#[test]
fn relative_outranks_generic() {
    let now = at(10, 0);
    let event = classifier()
        .classify("usage limit reached, retry in 10 minutes", now)
        .expect("must classify");

    assert_eq!(event.pattern_kind, PatternKind::RelativeDuration);
}

#[test]
fn unrelated_text_yields_none() {
    let c = classifier();
    let now = at(10, 0);
    for text in [
        "compiling 34 crates",
        "tests passed",
        "retry in eleventy minutes",
        "",
    ] {
        assert!(c.classify(text, now).is_none(), "false positive on {text:?}");
    }
}

#[test]
fn malformed_clock_time_is_not_an_event() {
    // Hour out of range: the clock kind must not match, and no other
    // phrasing applies.
    let event = classifier().classify("blocking until 25:00", at(10, 0));
    assert!(event.is_none());
}

#[test]
fn classification_is_deterministic() {
    let c = classifier();
    let now = at(10, 0);
    let text = "usage limit exceeded, try again at 4pm";
    assert_eq!(c.classify(text, now), c.classify(text, now));
}

#[test]
fn resume_at_never_precedes_detection() {
    let c = classifier();
    let now = at(23, 59);
    for text in [
        "usage limit exceeded",
        "blocking until 1am",
        "retry in 1 minute",
        "try again at 11:58pm",
    ] {
        let event = c.classify(text, now).unwrap_or_else(|| {
            panic!("expected an event for {text:?}");
        });
        assert!(event.resume_at >= now, "{text:?} resumed in the past");
    }
}

#[test]
fn raw_text_carries_matched_snippet() {
    let event = classifier()
        .classify("boom: usage limit exceeded!!", at(10, 0))
        .expect("must classify");
    assert_eq!(event.raw_text, "usage limit exceeded");
}

#[test]
fn utc_offset_shifts_clock_interpretation() {
    // At UTC 10:00 with a +02:00 offset the local wall clock reads 12:00,
    // so "until 1pm" is 13:00 local, i.e. 11:00 UTC.
    let c = Classifier::new(DEFAULT_BACKOFF, 120).expect("classifier must build");
    let now = at(10, 0);
    let event = c.classify("blocking until 1pm", now).expect("must classify");
    assert_eq!(event.resume_at, at(11, 0));
}
