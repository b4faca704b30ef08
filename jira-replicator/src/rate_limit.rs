//! Decoding of the advisory retry time carried by a rate-limited trigger.
//!
//! Jira rejects a backup request made too soon after the previous one with a
//! message such as `"... next allowed backup: 10h 25m"`. The hours and minutes
//! are summed and added to the current time rounded up to the next minute.
//! Text without a usable duration yields a retry time of "now", so a malformed
//! advisory can never stall the retry loop.

use chrono::{DateTime, Duration as TimeDelta, Timelike, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

fn advisory_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"(\d+)([hm])").expect("valid advisory regex"))
}

/// A rejected trigger, with the earliest time the server suggests retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCondition {
    retry_at: DateTime<Utc>,
}

impl RateLimitCondition {
    pub fn new(retry_at: DateTime<Utc>) -> Self {
        Self { retry_at }
    }

    /// Build a condition from the free text of a rejection response.
    pub fn from_advisory(text: &str, now: DateTime<Utc>) -> Self {
        let retry_at = decode_advisory(text)
            .and_then(|wait| ceil_to_minute(now).checked_add_signed(wait))
            .unwrap_or(now);
        Self { retry_at }
    }

    pub fn retry_at(&self) -> DateTime<Utc> {
        self.retry_at
    }

    /// Time left until `retry_at`, floored at zero.
    pub fn retry_in(&self, now: DateTime<Utc>) -> Duration {
        (self.retry_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for RateLimitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Backup rate exceeded. Try again at: {}",
            self.retry_at.to_rfc3339()
        )
    }
}

/// Sum every `<n>h` and `<n>m` token in `text`. `None` when there are none
/// or the total does not fit.
pub fn decode_advisory(text: &str) -> Option<TimeDelta> {
    let mut minutes: i64 = 0;
    let mut found = false;

    for caps in advisory_token().captures_iter(text) {
        let value: i64 = caps[1].parse().ok()?;
        let scaled = match &caps[2] {
            "h" => value.checked_mul(60)?,
            _ => value,
        };
        minutes = minutes.checked_add(scaled)?;
        found = true;
    }

    if !found {
        return None;
    }
    TimeDelta::try_minutes(minutes)
}

/// Round up to the next whole minute; exact minutes are left alone.
pub fn ceil_to_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    if floor == now {
        now
    } else {
        floor + TimeDelta::minutes(1)
    }
}
