use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_WEEK: i64 = 604_800;

/// A non-negative ISO 8601 duration such as `PT1H` or `P1DT12H`.
///
/// Only designators with a fixed length are accepted (weeks, days, hours,
/// minutes, seconds). Years and months are rejected because a sensor
/// resolution or a batch window must map to an exact number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoDuration {
    seconds: i64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid ISO 8601 duration '{input}': {reason}")]
pub struct ParseDurationError {
    input: String,
    reason: &'static str,
}

impl IsoDuration {
    pub const fn from_seconds(seconds: u32) -> Self {
        Self {
            seconds: seconds as i64,
        }
    }

    pub const fn from_minutes(minutes: u32) -> Self {
        Self {
            seconds: minutes as i64 * SECONDS_PER_MINUTE,
        }
    }

    pub const fn from_hours(hours: u32) -> Self {
        Self {
            seconds: hours as i64 * SECONDS_PER_HOUR,
        }
    }

    pub fn whole_seconds(&self) -> i64 {
        self.seconds
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0
    }

    pub fn as_duration(&self) -> time::Duration {
        time::Duration::seconds(self.seconds)
    }

    /// Number of `step`-sized intervals in `self`, if `step` divides it exactly.
    pub fn steps_of(&self, step: IsoDuration) -> Option<usize> {
        if step.seconds == 0 || self.seconds % step.seconds != 0 {
            return None;
        }
        usize::try_from(self.seconds / step.seconds).ok()
    }

    pub fn checked_mul(&self, factor: usize) -> Option<Self> {
        let factor = i64::try_from(factor).ok()?;
        self.seconds
            .checked_mul(factor)
            .map(|seconds| Self { seconds })
    }
}

impl TryFrom<time::Duration> for IsoDuration {
    type Error = ParseDurationError;

    fn try_from(d: time::Duration) -> Result<Self, Self::Error> {
        if d.is_negative() || d.subsec_nanoseconds() != 0 {
            return Err(ParseDurationError {
                input: d.to_string(),
                reason: "must be a non-negative whole number of seconds",
            });
        }
        Ok(Self {
            seconds: d.whole_seconds(),
        })
    }
}

fn parse_components(
    input: &str,
    part: &str,
    units: &[(char, i64)],
) -> Result<(i64, bool), ParseDurationError> {
    let err = |reason| ParseDurationError {
        input: input.to_string(),
        reason,
    };

    let mut total: i64 = 0;
    let mut seen = false;
    let mut digits = String::new();
    // Designators must appear in descending order, each at most once.
    let mut next_unit = 0;

    for ch in part.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let offset = units[next_unit..]
            .iter()
            .position(|(designator, _)| *designator == ch)
            .ok_or_else(|| err("unsupported or out-of-order designator"))?;
        let (_, scale) = units[next_unit + offset];
        next_unit += offset + 1;

        if digits.is_empty() {
            return Err(err("designator without a number"));
        }
        let value: i64 = digits.parse().map_err(|_| err("number out of range"))?;
        digits.clear();

        total = value
            .checked_mul(scale)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| err("number out of range"))?;
        seen = true;
    }

    if !digits.is_empty() {
        return Err(err("number without a designator"));
    }

    Ok((total, seen))
}

impl FromStr for IsoDuration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseDurationError {
            input: s.to_string(),
            reason,
        };

        let rest = s.trim().strip_prefix('P').ok_or_else(|| err("must start with 'P'"))?;
        let (date_part, time_part) = match rest.split_once('T') {
            Some((date, time)) => (date, Some(time)),
            None => (rest, None),
        };

        let (date_seconds, date_seen) = parse_components(
            s,
            date_part,
            &[('W', SECONDS_PER_WEEK), ('D', SECONDS_PER_DAY)],
        )?;

        let (time_seconds, time_seen) = match time_part {
            Some(part) => {
                let parsed = parse_components(
                    s,
                    part,
                    &[('H', SECONDS_PER_HOUR), ('M', SECONDS_PER_MINUTE), ('S', 1)],
                )?;
                if !parsed.1 {
                    return Err(err("'T' must be followed by a time component"));
                }
                parsed
            }
            None => (0, false),
        };

        if !date_seen && !time_seen {
            return Err(err("no duration components"));
        }

        let seconds = date_seconds
            .checked_add(time_seconds)
            .ok_or_else(|| err("number out of range"))?;

        Ok(Self { seconds })
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds == 0 {
            return f.write_str("PT0S");
        }

        let days = self.seconds / SECONDS_PER_DAY;
        let remaining = self.seconds % SECONDS_PER_DAY;
        let hours = remaining / SECONDS_PER_HOUR;
        let remaining = remaining % SECONDS_PER_HOUR;
        let minutes = remaining / SECONDS_PER_MINUTE;
        let seconds = remaining % SECONDS_PER_MINUTE;

        f.write_str("P")?;
        if days > 0 {
            write!(f, "{days}D")?;
        }
        if hours > 0 || minutes > 0 || seconds > 0 {
            f.write_str("T")?;
            if hours > 0 {
                write!(f, "{hours}H")?;
            }
            if minutes > 0 {
                write!(f, "{minutes}M")?;
            }
            if seconds > 0 {
                write!(f, "{seconds}S")?;
            }
        }
        Ok(())
    }
}

impl Serialize for IsoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
