//! Duration expressions used by the moderation and reminder commands
//!
//! An expression is a sequence of `<number><unit>` pairs such as `1d12h` or
//! `90m`, optionally prefixed with `-` to shorten an existing duration.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Units in the order they are reported, with their upper limits
const UNITS: [(char, &str, i64, i64); 5] = [
    ('w', "week", 10_428, 604_800),
    ('d', "day", 73_000, 86_400),
    ('h', "hour", 1_752_000, 3_600),
    ('m', "minute", 105_100_000, 60),
    ('s', "second", 6_307_000_000, 1),
];

/// Maximum number of `<number><unit>` components
const MAX_COMPONENTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("Improper input.")]
    Improper,

    #[error("**{0}** isn't a valid letter input")]
    UnknownUnit(char),

    #[error("Improper input, please don't do '1m1m' or '1h2h'.")]
    RepeatedUnit,

    #[error("Value too large. Please make sure it's less than {limit} {unit}s")]
    TooLarge { limit: i64, unit: &'static str },
}

/// Parse a duration expression into a signed offset
///
/// # Errors
/// Returns a [`DurationError`] describing the first problem found.
pub fn parse_offset(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();
    let (negative, body) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let mut seen = [false; UNITS.len()];
    let mut components = 0;
    let mut total = 0_i64;
    let mut chars = body.chars().peekable();

    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.next_if(char::is_ascii_digit) {
            digits.push(c);
        }
        let Some(unit) = chars.next() else {
            return Err(DurationError::Improper);
        };
        if digits.is_empty() {
            return Err(DurationError::Improper);
        }

        let index = UNITS
            .iter()
            .position(|(letter, ..)| *letter == unit)
            .ok_or(DurationError::UnknownUnit(unit))?;
        let (_, name, limit, seconds) = UNITS[index];

        if seen[index] {
            return Err(DurationError::RepeatedUnit);
        }
        seen[index] = true;

        let value: i64 = digits
            .parse()
            .map_err(|_| DurationError::TooLarge { limit, unit: name })?;
        if value >= limit {
            return Err(DurationError::TooLarge { limit, unit: name });
        }

        total += value * seconds;
        components += 1;
    }

    if components == 0 || components > MAX_COMPONENTS {
        return Err(DurationError::Improper);
    }

    let offset = Duration::seconds(total);
    Ok(if negative { -offset } else { offset })
}

/// Shift `base` by the duration expression
///
/// # Errors
/// Returns a [`DurationError`] if the expression is invalid.
pub fn apply_offset(base: DateTime<Utc>, input: &str) -> Result<DateTime<Utc>, DurationError> {
    parse_offset(input).map(|offset| base + offset)
}

/// Human-readable UTC timestamp used in replies and audit reasons
#[must_use]
pub fn display_time(time: DateTime<Utc>) -> String {
    time.format("%B %-d, %Y | %I:%M %p UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_offset("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_offset("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_offset("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_offset("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_offset("1w").unwrap(), Duration::weeks(1));
    }

    #[test]
    fn test_parse_combined_and_negative() {
        assert_eq!(
            parse_offset("1d12h").unwrap(),
            Duration::days(1) + Duration::hours(12)
        );
        assert_eq!(
            parse_offset("-1h30m").unwrap(),
            -(Duration::hours(1) + Duration::minutes(30))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_offset(""), Err(DurationError::Improper));
        assert_eq!(parse_offset("-"), Err(DurationError::Improper));
        assert_eq!(parse_offset("12"), Err(DurationError::Improper));
        assert_eq!(parse_offset("h"), Err(DurationError::Improper));
        assert_eq!(parse_offset("3y"), Err(DurationError::UnknownUnit('y')));
        assert_eq!(parse_offset("1m1m"), Err(DurationError::RepeatedUnit));
        assert_eq!(
            parse_offset("10428w"),
            Err(DurationError::TooLarge {
                limit: 10_428,
                unit: "week"
            })
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DurationError::UnknownUnit('y').to_string(),
            "**y** isn't a valid letter input"
        );
        assert_eq!(
            DurationError::TooLarge {
                limit: 73_000,
                unit: "day"
            }
            .to_string(),
            "Value too large. Please make sure it's less than 73000 days"
        );
    }

    #[test]
    fn test_apply_offset() {
        let base: DateTime<Utc> = "2024-03-01T12:00:00Z".parse().unwrap();
        let later = apply_offset(base, "1h").unwrap();
        assert_eq!(later, base + Duration::hours(1));
        let earlier = apply_offset(base, "-2d").unwrap();
        assert_eq!(earlier, base - Duration::days(2));
    }

    #[test]
    fn test_display_time() {
        let time: DateTime<Utc> = "2024-03-05T15:04:00Z".parse().unwrap();
        assert_eq!(display_time(time), "March 5, 2024 | 03:04 PM UTC");
    }
}
