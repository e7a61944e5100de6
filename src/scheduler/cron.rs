//! Cron expression handling
//!
//! Accepts standard 5-field expressions (minute precision) as well as the
//! 6/7-field form with seconds and years. Evaluation is in UTC.
//!
//! The 5-field form uses POSIX weekdays: 0-7 with both 0 and 7 meaning
//! Sunday. The 6/7-field form is passed through unchanged and numbers
//! weekdays 1 (Sunday) to 7 (Saturday).

use chrono::{DateTime, Utc};
use std::str::FromStr;

use super::error::{SchedulerError, SchedulerResult};

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse an expression; 5-field expressions fire at second 0
    pub fn parse(expression: &str) -> SchedulerResult<Self> {
        let trimmed = expression.trim();
        let fields = trimmed.split_whitespace().count();

        let normalized = match fields {
            5 => {
                let mut parts: Vec<String> =
                    trimmed.split_whitespace().map(str::to_string).collect();
                parts[4] = posix_weekdays(&parts[4])
                    .map_err(|reason| SchedulerError::invalid_cron(expression, reason))?;
                format!("0 {}", parts.join(" "))
            }
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(SchedulerError::invalid_cron(
                    expression,
                    format!("expected 5, 6 or 7 fields, found {n}"),
                ))
            }
        };

        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::invalid_cron(expression, e.to_string()))?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Most recent occurrence in `(after, until]`
    ///
    /// Earlier occurrences in the window are coalesced into this one.
    pub fn latest_in(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if until <= after {
            return None;
        }
        self.schedule
            .after(&after)
            .take_while(|occurrence| *occurrence <= until)
            .last()
    }

    /// Number of occurrences in `(after, until]`
    pub fn count_in(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> usize {
        if until <= after {
            return 0;
        }
        self.schedule
            .after(&after)
            .take_while(|occurrence| *occurrence <= until)
            .count()
    }
}

// ============================================================================
// Weekday Translation
// ============================================================================

/// POSIX weekday (0-7, Sunday is 0 and 7) from a number or English name
fn weekday_number(token: &str) -> Result<u32, String> {
    if let Ok(n) = token.parse::<u32>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("weekday {n} is out of range 0-7"))
        };
    }

    let day = match token.to_ascii_lowercase().as_str() {
        "sun" | "sunday" => 0,
        "mon" | "monday" => 1,
        "tue" | "tues" | "tuesday" => 2,
        "wed" | "wednesday" => 3,
        "thu" | "thurs" | "thursday" => 4,
        "fri" | "friday" => 5,
        "sat" | "saturday" => 6,
        _ => return Err(format!("'{token}' is not a valid day of the week")),
    };
    Ok(day)
}

/// Rewrite a POSIX day-of-week field as an explicit list in the 1 (Sunday)
/// to 7 (Saturday) numbering the `cron` crate evaluates
fn posix_weekdays(field: &str) -> Result<String, String> {
    let mut ordinals: Vec<u32> = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid weekday step '{step}'"))?;
                if step == 0 {
                    return Err("weekday step cannot be zero".to_string());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = match range {
            "*" | "?" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (weekday_number(a)?, weekday_number(b)?),
                // `n/step` runs to the end of the week
                None if step > 1 => (weekday_number(range)?, 6),
                None => {
                    let n = weekday_number(range)?;
                    (n, n)
                }
            },
        };
        if start > end {
            return Err(format!("weekday range '{range}' runs backwards"));
        }

        for day in (start..=end).step_by(step as usize) {
            let ordinal = day % 7 + 1;
            if !ordinals.contains(&ordinal) {
                ordinals.push(ordinal);
            }
        }
    }

    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }
    ordinals.sort_unstable();
    Ok(ordinals
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_field_counts() {
        assert!(CronSchedule::parse("*/5 * * * *").is_ok());
        assert!(CronSchedule::parse("0 */5 * * * *").is_ok());
        assert!(CronSchedule::parse("0 0 12 * * * 2026").is_ok());
        assert!(CronSchedule::parse("* * *").is_err());
        assert!(CronSchedule::parse("").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
    }

    #[test]
    fn test_invalid_cron_error_carries_expression() {
        let err = CronSchedule::parse("not a cron").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { expression, .. } if expression == "not a cron"));
    }

    #[test]
    fn test_five_fields_fire_on_the_minute() {
        let cron = CronSchedule::parse("30 * * * *").unwrap();
        assert_eq!(cron.next_after(at(10, 0, 0)), Some(at(10, 30, 0)));
    }

    // 2026-10-17 is a Saturday
    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_weekday_zero_and_seven_are_sunday() {
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let seven = CronSchedule::parse("0 0 * * 7").unwrap();

        assert_eq!(zero.next_after(day(17, 12)), Some(day(18, 0)));
        assert_eq!(seven.next_after(day(17, 12)), Some(day(18, 0)));
    }

    #[test]
    fn test_weekday_range_is_monday_to_friday() {
        let cron = CronSchedule::parse("0 9 * * 1-5").unwrap();

        assert_eq!(cron.next_after(day(17, 12)), Some(day(19, 9)));
        let fires: Vec<_> = cron.schedule.after(&day(17, 12)).take(6).collect();
        assert_eq!(
            fires,
            vec![day(19, 9), day(20, 9), day(21, 9), day(22, 9), day(23, 9), day(26, 9)]
        );
    }

    #[test]
    fn test_weekday_names_and_lists() {
        let sun = CronSchedule::parse("0 0 * * SUN").unwrap();
        assert_eq!(sun.next_after(day(17, 12)), Some(day(18, 0)));

        let weekend = CronSchedule::parse("0 10 * * sat,Sun").unwrap();
        assert_eq!(weekend.next_after(day(17, 12)), Some(day(18, 10)));

        let wrap = CronSchedule::parse("0 10 * * 5-7").unwrap();
        assert_eq!(wrap.count_in(day(17, 0), day(24, 0)), 3);

        assert!(CronSchedule::parse("0 0 * * 8").is_err());
        assert!(CronSchedule::parse("0 0 * * 5-1").is_err());
        assert!(CronSchedule::parse("0 0 * * funday").is_err());
    }

    #[test]
    fn test_weekday_translation() {
        assert_eq!(posix_weekdays("*").unwrap(), "*");
        assert_eq!(posix_weekdays("0").unwrap(), "1");
        assert_eq!(posix_weekdays("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(posix_weekdays("*/2").unwrap(), "1,3,5,7");
        assert_eq!(posix_weekdays("6,7").unwrap(), "1,7");
    }

    #[test]
    fn test_latest_in_coalesces_window() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();

        assert_eq!(cron.latest_in(at(9, 30, 0), at(12, 15, 0)), Some(at(12, 0, 0)));
        assert_eq!(cron.count_in(at(9, 30, 0), at(12, 15, 0)), 3);

        // Window bounds: exclusive start, inclusive end
        assert_eq!(cron.latest_in(at(12, 0, 0), at(12, 59, 59)), None);
        assert_eq!(cron.latest_in(at(11, 59, 59), at(12, 0, 0)), Some(at(12, 0, 0)));
        assert_eq!(cron.latest_in(at(12, 0, 0), at(11, 0, 0)), None);
    }
}
