//! Wall-clock helpers shared by decay, temporal framing, and gap tracking.
//!
//! The store's timestamps are always wall-clock (`chrono::Utc`); a monotonic
//! clock is only used for process uptime in the daemon crate. Every duration
//! computed here clamps at zero so a backward clock jump can't produce a
//! negative age that would corrupt decay or temporal framing.

use chrono::{DateTime, Utc};

/// Days elapsed between `since` and `now`, floored at 0.0.
pub fn days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - since).num_seconds().max(0) as f64;
    seconds / 86_400.0
}

/// Seconds elapsed between `since` and `now`, floored at 0.
pub fn seconds_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_seconds().max(0)
}

/// Render a duration in seconds as "2 days and 3 hours" style prose, the way
/// the context assembler's temporal framing block needs it.
pub fn humanize_duration(total_seconds: i64) -> String {
    let total_seconds = total_seconds.max(0);
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{} day{}", days, if days == 1 { "" } else { "s" }));
    }
    if hours > 0 {
        parts.push(format!("{} hour{}", hours, if hours == 1 { "" } else { "s" }));
    }
    if days == 0 && hours == 0 {
        parts.push(format!(
            "{} minute{}",
            minutes,
            if minutes == 1 { "" } else { "s" }
        ));
    }

    match parts.len() {
        0 => "a moment".to_string(),
        1 => parts.remove(0),
        _ => {
            let last = parts.remove(parts.len() - 1);
            format!("{} and {}", parts.join(", "), last)
        }
    }
}

/// The calibrated temporal-framing sentence bucket a gap falls into (§4.6 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapBucket {
    SubMinute,
    UpToTenMinutes,
    UpToOneHour,
    UpToFourHours,
    UpToOneDay,
    UpToTwoDays,
    UpToOneWeek,
    UpToTwoWeeks,
    TwoWeeksOrMore,
}

impl GapBucket {
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            s if s < 60 => GapBucket::SubMinute,
            s if s < 600 => GapBucket::UpToTenMinutes,
            s if s < 3_600 => GapBucket::UpToOneHour,
            s if s < 4 * 3_600 => GapBucket::UpToFourHours,
            s if s < 86_400 => GapBucket::UpToOneDay,
            s if s < 2 * 86_400 => GapBucket::UpToTwoDays,
            s if s < 7 * 86_400 => GapBucket::UpToOneWeek,
            s if s < 14 * 86_400 => GapBucket::UpToTwoWeeks,
            _ => GapBucket::TwoWeeksOrMore,
        }
    }

    /// The calibrated sentence to append after the human-readable duration.
    pub fn framing_sentence(self) -> &'static str {
        match self {
            GapBucket::SubMinute => {
                "This is a direct continuation of the conversation — do not re-greet."
            }
            GapBucket::UpToTenMinutes => "Pick up where things left off.",
            GapBucket::UpToOneHour => {
                "Some time has passed, but the thread of conversation is still fresh."
            }
            GapBucket::UpToFourHours => {
                "A few hours have passed since the last exchange."
            }
            GapBucket::UpToOneDay => "It's been most of a day since the last conversation.",
            GapBucket::UpToTwoDays => "A day or two has passed since last speaking.",
            GapBucket::UpToOneWeek => "It's been several days — catching up may help.",
            GapBucket::UpToTwoWeeks => "More than a week has passed since the last conversation.",
            GapBucket::TwoWeeksOrMore => {
                "This is a significant gap — be curious about what's changed, don't assume."
            }
        }
    }
}
