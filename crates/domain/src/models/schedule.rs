//! Job cadence parsing and next-fire calculation.
//!
//! Supported forms:
//! - standard 5-field cron: `minute hour day-of-month month day-of-week`
//! - macros: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//!   `@midnight`, `@hourly`
//! - fixed intervals: `@every 30s` (units `ms`, `s`, `m`, `h`)
//!
//! Cron times are evaluated in UTC.

use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ScheduleError;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl Cadence {
    /// Parse a schedule expression.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();

        if let Some(interval) = expression.strip_prefix("@every") {
            return parse_interval(interval.trim()).map(Cadence::Every);
        }

        let five_field = match expression {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(ScheduleError::InvalidExpression(format!(
                    "unknown descriptor {other}"
                )))
            }
            other => other,
        };

        let fields: Vec<&str> = five_field.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidFieldCount(fields.len()));
        }

        // The cron crate expects `sec min hour dom month dow year` and numbers
        // weekdays from 1 (Sunday), so the weekday field is rewritten by name.
        let converted = format!(
            "0 {} {} {} {} {} *",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            convert_day_of_week(fields[4])
        );

        cron::Schedule::from_str(&converted)
            .map(|schedule| Cadence::Cron(Box::new(schedule)))
            .map_err(|e| ScheduleError::InvalidExpression(e.to_string()))
    }

    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Cron(schedule) => schedule.after(&after).next(),
            Cadence::Every(interval) => chrono::Duration::from_std(*interval)
                .ok()
                .and_then(|step| after.checked_add_signed(step)),
        }
    }
}

impl FromStr for Cadence {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cadence::parse(s)
    }
}

fn parse_interval(text: &str) -> Result<Duration, ScheduleError> {
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ScheduleError::InvalidInterval(format!("missing unit in '{text}'")))?;
    let (digits, unit) = text.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| ScheduleError::InvalidInterval(format!("invalid number in '{text}'")))?;
    if value == 0 {
        return Err(ScheduleError::InvalidInterval(
            "interval must be greater than zero".to_string(),
        ));
    }

    let too_long = || ScheduleError::InvalidInterval(format!("interval '{text}' is too long"));
    let interval = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_long)?),
        "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_long)?),
        other => {
            return Err(ScheduleError::InvalidInterval(format!("unknown unit '{other}'")))
        }
    };

    // Must fit a chrono duration or the job could never be scheduled.
    chrono::Duration::from_std(interval).map_err(|_| too_long())?;
    Ok(interval)
}

const WEEKDAY_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Rewrite numeric weekdays (0-7, both 0 and 7 meaning Sunday) as names.
fn convert_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(convert_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn convert_weekday_item(item: &str) -> String {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };

    if let Some(days) = expand_weekday_range(base, step) {
        return days;
    }

    let base = if base == "*" || base == "?" {
        base.to_string()
    } else {
        base.split('-')
            .map(|part| match part.parse::<usize>() {
                Ok(n) if n < WEEKDAY_NAMES.len() => WEEKDAY_NAMES[n].to_string(),
                _ => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join("-")
    };
    match step {
        Some(step) => format!("{base}/{step}"),
        None => base,
    }
}

/// Numeric ranges ending on Sunday-as-7 (`5-7`) or wrapping through Sunday
/// (`6-0`) have no named-range equivalent, so they become explicit lists.
fn expand_weekday_range(base: &str, step: Option<&str>) -> Option<String> {
    let (lo, hi) = base.split_once('-')?;
    let lo: usize = lo.parse().ok()?;
    let hi: usize = hi.parse().ok()?;
    if lo >= WEEKDAY_NAMES.len() || hi >= WEEKDAY_NAMES.len() || (hi != 7 && lo <= hi) {
        return None;
    }
    let step = match step {
        Some(step) => step.parse::<usize>().ok().filter(|s| *s > 0)?,
        None => 1,
    };

    let days: Vec<usize> = if lo <= hi {
        (lo..=hi).collect()
    } else {
        (lo..=6).chain(0..=hi).collect()
    };
    let mut names: Vec<&str> = Vec::new();
    for day in days.into_iter().step_by(step) {
        if !names.contains(&WEEKDAY_NAMES[day]) {
            names.push(WEEKDAY_NAMES[day]);
        }
    }
    Some(names.join(","))
}
