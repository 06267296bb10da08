//! Retry policy for live provider data.
//!
//! Polling failures are not retried in a tight loop: each failed tick counts one
//! attempt and the policy decides how long until the next one, or that the leg
//! should give up on live data.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed polls tolerated before switching the leg to fallback.
    pub max_attempts: u32,
    /// Seconds between attempts outside quiet hours.
    pub interval_secs: u32,
    /// Local hour (inclusive) at which quiet hours begin.
    pub quiet_start_hour: u32,
    /// Local hour (exclusive) at which quiet hours end. May be below the start to wrap midnight.
    pub quiet_end_hour: u32,
    /// Interval multiplier applied during quiet hours.
    pub quiet_multiplier: f64,
    /// Offset of the provider's local time from UTC.
    pub utc_offset_hours: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval_secs: 10,
            quiet_start_hour: 0,
            quiet_end_hour: 5,
            quiet_multiplier: 2.0,
            utc_offset_hours: 9,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, after_secs: u32 },
    Exhausted,
}

impl RetryPolicy {
    pub fn is_quiet_hour(&self, now: DateTime<Utc>) -> bool {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());
        let hour = now.with_timezone(&offset).hour();
        let (start, end) = (self.quiet_start_hour, self.quiet_end_hour);
        if start <= end {
            (start..end).contains(&hour)
        } else {
            hour >= start || hour < end
        }
    }

    /// Seconds to wait before the next attempt at `now`.
    pub fn interval_at(&self, now: DateTime<Utc>) -> u32 {
        if self.is_quiet_hour(now) {
            (f64::from(self.interval_secs) * self.quiet_multiplier).round() as u32
        } else {
            self.interval_secs
        }
    }

    /// Decision after `failures` consecutive failed polls (counting the one just made).
    pub fn decide(&self, failures: u32, now: DateTime<Utc>) -> RetryDecision {
        if failures >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                attempt: failures,
                after_secs: self.interval_at(now),
            }
        }
    }
}

/// Runs `op` up to `attempts` times with a fixed `delay` between failures and returns
/// the last error if all of them fail.
pub async fn with_fixed_retries<T, E, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(_) => {
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
