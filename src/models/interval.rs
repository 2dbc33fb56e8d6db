//! Streak-based review interval ladder.
//!
//! Each consecutive correct answer pushes the next review further out:
//! - streak 0 (or a reset after a wrong answer): due immediately
//! - streak 1: one hour
//! - streak 2: one day
//! - streak 3: three days
//! - streak 4 and above: one week

use chrono::{DateTime, Duration, Utc};

/// Returns the instant after which an item with the given success streak is due again.
pub fn next_review_time(success_streak: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    now + interval_for(success_streak)
}

/// Gap between the answer and the next review for a streak.
pub fn interval_for(success_streak: i64) -> Duration {
    match success_streak {
        i64::MIN..=0 => Duration::zero(),
        1 => Duration::hours(1),
        2 => Duration::days(1),
        3 => Duration::days(3),
        _ => Duration::days(7),
    }
}
