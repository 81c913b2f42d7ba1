//! Delay input parsing.
//!
//! Accepts a positive count of minutes (`"60"`) or a 24-hour clock time
//! (`"23:30"`). Clock times resolve against the current date and roll to the
//! next day when the time has already passed today.

use crate::error::{AgentError, Result};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use std::fmt;
use std::str::FromStr;

/// User-facing format hint attached to every parse failure.
pub const DELAY_FORMAT_HINT: &str =
    "use a number of minutes (e.g. 60) or a 24-hour time HH:MM (e.g. 23:30)";

/// Parsed operator delay input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySpec {
    /// Relative delay in minutes. May be zero or negative until resolved.
    Minutes(i64),
    /// Absolute wall-clock time, seconds always zero.
    ClockTime(NaiveTime),
}

/// A delay pinned to a concrete fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDelay {
    pub fire_at: NaiveDateTime,
    pub delay: TimeDelta,
}

impl FromStr for DelaySpec {
    type Err = AgentError;

    fn from_str(raw: &str) -> Result<Self> {
        let input = raw.trim();
        if input.contains(':') {
            return parse_clock_time(input).map(Self::ClockTime);
        }
        input
            .parse::<i64>()
            .map(Self::Minutes)
            .map_err(|_| AgentError::parse(input, DELAY_FORMAT_HINT))
    }
}

impl fmt::Display for DelaySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes(m) => write!(f, "in {m} min"),
            Self::ClockTime(t) => write!(f, "at {}", t.format("%H:%M")),
        }
    }
}

impl DelaySpec {
    /// Resolve against `now`. Fails with [`AgentError::InvalidDelay`] unless
    /// the resulting delay is strictly positive.
    pub fn resolve(&self, now: NaiveDateTime) -> Result<ResolvedDelay> {
        let resolved = match *self {
            Self::Minutes(minutes) => {
                let delay = TimeDelta::try_minutes(minutes).ok_or(AgentError::InvalidDelay)?;
                let fire_at = now
                    .checked_add_signed(delay)
                    .ok_or(AgentError::InvalidDelay)?;
                ResolvedDelay { fire_at, delay }
            }
            Self::ClockTime(time) => {
                let mut fire_at = now.date().and_time(time);
                if fire_at <= now {
                    fire_at += TimeDelta::days(1);
                }
                ResolvedDelay {
                    fire_at,
                    delay: fire_at - now,
                }
            }
        };

        if resolved.delay <= TimeDelta::zero() {
            return Err(AgentError::InvalidDelay);
        }
        Ok(resolved)
    }
}

/// `H:MM` or `HH:MM`, hour 0-23, minute exactly two digits 00-59.
fn parse_clock_time(input: &str) -> Result<NaiveTime> {
    let invalid = || AgentError::parse(input, DELAY_FORMAT_HINT);
    let (hour, minute) = input.split_once(':').ok_or_else(invalid)?;

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(hour) || hour.len() > 2 || !digits(minute) || minute.len() != 2 {
        return Err(invalid());
    }

    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Render a delay as `Xh Ym Zs` for status messages.
#[must_use]
pub fn format_remaining(delay: TimeDelta) -> String {
    let total = delay.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    format!("{hours}h {minutes}m {seconds}s")
}
