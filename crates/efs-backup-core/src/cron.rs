//! EventBridge cron expressions.
//!
//! Six fields: `minutes hours day-of-month month day-of-week year`.
//! Supported per field: `*`, single values, ranges `a-b`, steps `*/n`,
//! `a/n`, `a-b/n`, and comma lists. `?` is allowed only in the day fields and
//! exactly one of them must use it. Day-of-week runs 1-7 with 1 = Sunday.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{AssemblyError, Result};

/// How far ahead `next_after` searches. Covers leap days.
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"^(\*|(\d+)(?:-(\d+))?)(?:/(\d+))?$").expect("cron token regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Minutes,
    Hours,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            FieldKind::Minutes => "minutes",
            FieldKind::Hours => "hours",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
            FieldKind::Year => "year",
        }
    }

    fn range(&self) -> (u32, u32) {
        match self {
            FieldKind::Minutes => (0, 59),
            FieldKind::Hours => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (1, 7),
            FieldKind::Year => (1970, 2199),
        }
    }

    fn allows_question_mark(&self) -> bool {
        matches!(self, FieldKind::DayOfMonth | FieldKind::DayOfWeek)
    }
}

/// One parsed field. `None` means "any".
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: Option<BTreeSet<u32>>,
    question_mark: bool,
}

impl CronField {
    fn parse(raw: &str, kind: FieldKind, expression: &str) -> Result<Self> {
        let fail = |reason: String| {
            AssemblyError::schedule(expression, format!("{} field: {}", kind.name(), reason))
        };

        if raw == "?" {
            if !kind.allows_question_mark() {
                return Err(fail("'?' is only allowed in day fields".to_string()));
            }
            return Ok(Self {
                values: None,
                question_mark: true,
            });
        }
        if raw == "*" {
            return Ok(Self {
                values: None,
                question_mark: false,
            });
        }

        let (min, max) = kind.range();
        let mut values = BTreeSet::new();
        for token in raw.split(',') {
            let caps = token_regex()
                .captures(token)
                .ok_or_else(|| fail(format!("unsupported token '{}'", token)))?;
            let number = |i: usize| -> Result<Option<u32>> {
                caps.get(i)
                    .map(|m| {
                        m.as_str()
                            .parse::<u32>()
                            .map_err(|_| fail(format!("'{}' is out of range", m.as_str())))
                    })
                    .transpose()
            };

            let (start, end) = match number(2)? {
                Some(start) => (start, number(3)?.unwrap_or(start)),
                None => (min, max),
            };
            let step = number(4)?.unwrap_or(1);
            // `a/n` runs from a to the end of the range
            let end = if caps.get(3).is_none() && caps.get(4).is_some() && caps.get(2).is_some() {
                max
            } else {
                end
            };

            if start < min || end > max || start > end {
                return Err(fail(format!(
                    "'{}' is outside {}-{}",
                    token, min, max
                )));
            }
            if step == 0 {
                return Err(fail("step must be positive".to_string()));
            }
            values.extend((start..=end).step_by(step as usize));
        }

        Ok(Self {
            values: Some(values),
            question_mark: false,
        })
    }

    fn contains(&self, value: u32) -> bool {
        self.values.as_ref().map_or(true, |v| v.contains(&value))
    }

    fn is_any(&self) -> bool {
        self.values.is_none()
    }

    fn candidates(&self, kind: FieldKind) -> Vec<u32> {
        match &self.values {
            Some(values) => values.iter().copied().collect(),
            None => {
                let (min, max) = kind.range();
                (min..=max).collect()
            }
        }
    }
}

/// A validated, repeating cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: CronField,
    hours: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
    year: CronField,
}

impl CronExpression {
    /// Parse the six space-separated fields (without the `cron(...)` wrapper).
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let inner = expression
            .strip_prefix("cron(")
            .and_then(|e| e.strip_suffix(')'))
            .unwrap_or(expression);
        let parts: Vec<&str> = inner.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(AssemblyError::schedule(
                inner,
                format!("expected 6 fields, found {}", parts.len()),
            ));
        }

        let parsed = Self {
            source: parts.join(" "),
            minutes: CronField::parse(parts[0], FieldKind::Minutes, inner)?,
            hours: CronField::parse(parts[1], FieldKind::Hours, inner)?,
            day_of_month: CronField::parse(parts[2], FieldKind::DayOfMonth, inner)?,
            month: CronField::parse(parts[3], FieldKind::Month, inner)?,
            day_of_week: CronField::parse(parts[4], FieldKind::DayOfWeek, inner)?,
            year: CronField::parse(parts[5], FieldKind::Year, inner)?,
        };

        if parsed.day_of_month.question_mark == parsed.day_of_week.question_mark {
            return Err(AssemblyError::schedule(
                inner,
                "exactly one of day-of-month and day-of-week must be '?'",
            ));
        }
        if !parsed.year.is_any() {
            return Err(AssemblyError::schedule(
                inner,
                "year must be '*' for a repeating schedule",
            ));
        }
        if parsed.next_after(reference_instant()).is_none() {
            return Err(AssemblyError::schedule(inner, "schedule never fires"));
        }
        Ok(parsed)
    }

    /// Every day at `hour:minute` UTC.
    pub fn daily(hour: u32, minute: u32) -> Result<Self> {
        Self::parse(&format!("{} {} * * ? *", minute, hour))
    }

    /// The six fields, space separated.
    pub fn fields(&self) -> &str {
        &self.source
    }

    /// The `ScheduleExpression` string, e.g. `cron(0 15 * * ? *)`.
    pub fn schedule_expression(&self) -> String {
        format!("cron({})", self.source)
    }

    /// First fire time strictly after `after`, minute resolution.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let hours = self.hours.candidates(FieldKind::Hours);
        let minutes = self.minutes.candidates(FieldKind::Minutes);
        let first_day = after.date_naive();

        for offset in 0..=SEARCH_HORIZON_DAYS {
            let day = first_day + Duration::days(offset);
            if !self.day_matches(day) {
                continue;
            }
            for &hour in &hours {
                for &minute in &minutes {
                    let Some(naive) = day.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let candidate = Utc.from_utc_datetime(&naive);
                    if candidate > after {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    pub const MAX_UPCOMING: usize = 1000;

    /// The next `count` fire times after `after`, at most
    /// [`MAX_UPCOMING`](Self::MAX_UPCOMING) of them.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let count = count.min(Self::MAX_UPCOMING);
        let mut times = Vec::new();
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }

    fn day_matches(&self, day: NaiveDate) -> bool {
        self.year.contains(day.year() as u32)
            && self.month.contains(day.month())
            && self.day_of_month.contains(day.day())
            && self
                .day_of_week
                .contains(day.weekday().number_from_sunday())
    }
}

impl Serialize for CronExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.schedule_expression())
    }
}

impl std::fmt::Display for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.schedule_expression())
    }
}

/// Fixed instant used to check that a schedule can fire at all.
fn reference_instant() -> DateTime<Utc> {
    Utc.timestamp_opt(946_684_800, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_expression() {
        let cron = CronExpression::daily(15, 0).unwrap();
        assert_eq!(cron.schedule_expression(), "cron(0 15 * * ? *)");
    }

    #[test]
    fn test_accepts_wrapped_form() {
        let cron = CronExpression::parse("cron(0 17 * * ? *)").unwrap();
        assert_eq!(cron.fields(), "0 17 * * ? *");
    }

    #[test]
    fn test_next_after_same_day_and_rollover() {
        let cron = CronExpression::daily(15, 0).unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 1, 9, 30)), Some(at(2024, 3, 1, 15, 0)));
        assert_eq!(cron.next_after(at(2024, 3, 1, 15, 0)), Some(at(2024, 3, 2, 15, 0)));
    }

    #[test]
    fn test_upcoming() {
        let cron = CronExpression::daily(17, 0).unwrap();
        let times = cron.upcoming(at(2024, 12, 31, 18, 0), 2);
        assert_eq!(times, vec![at(2025, 1, 1, 17, 0), at(2025, 1, 2, 17, 0)]);
    }

    #[test]
    fn test_upcoming_count_is_capped() {
        let cron = CronExpression::daily(18, 0).unwrap();
        let start = at(2024, 1, 1, 0, 0);
        let times = cron.upcoming(start, usize::MAX);
        assert_eq!(times.len(), CronExpression::MAX_UPCOMING);
        assert_eq!(times[0], at(2024, 1, 1, 18, 0));
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert!(cron.upcoming(start, 0).is_empty());
    }

    #[test]
    fn test_lists_ranges_and_steps() {
        let cron = CronExpression::parse("0/30 9-10 ? * 2-6 *").unwrap();
        // 2024-03-02 is a Saturday; next weekday is Monday 4th
        assert_eq!(cron.next_after(at(2024, 3, 2, 12, 0)), Some(at(2024, 3, 4, 9, 0)));
        assert_eq!(cron.next_after(at(2024, 3, 4, 9, 0)), Some(at(2024, 3, 4, 9, 30)));
        assert_eq!(cron.next_after(at(2024, 3, 4, 10, 30)), Some(at(2024, 3, 5, 9, 0)));
    }

    #[test]
    fn test_day_of_week_sunday_is_one() {
        let cron = CronExpression::parse("0 0 ? * 1 *").unwrap();
        // 2024-03-03 is a Sunday
        assert_eq!(cron.next_after(at(2024, 3, 1, 0, 0)), Some(at(2024, 3, 3, 0, 0)));
    }

    #[test]
    fn test_leap_day_schedule_is_valid() {
        let cron = CronExpression::parse("0 0 29 2 ? *").unwrap();
        assert_eq!(cron.next_after(at(2025, 1, 1, 0, 0)), Some(at(2028, 2, 29, 0, 0)));
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(matches!(
            CronExpression::parse("0 15 * * ?"),
            Err(AssemblyError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(CronExpression::parse("60 15 * * ? *").is_err());
        assert!(CronExpression::parse("0 24 * * ? *").is_err());
        assert!(CronExpression::parse("0 1 ? * 8 *").is_err());
    }

    #[test]
    fn test_requires_exactly_one_question_mark() {
        assert!(CronExpression::parse("0 15 * * * *").is_err());
        assert!(CronExpression::parse("0 15 ? * ? *").is_err());
        assert!(CronExpression::parse("? 15 * * ? *").is_err());
    }

    #[test]
    fn test_rejects_fixed_year() {
        let err = CronExpression::parse("0 15 * * ? 2030").unwrap_err();
        assert!(err.to_string().contains("repeating"));
    }

    #[test]
    fn test_rejects_impossible_date() {
        let err = CronExpression::parse("0 0 31 4 ? *").unwrap_err();
        assert!(err.to_string().contains("never fires"));
    }

    #[test]
    fn test_rejects_unsupported_tokens() {
        assert!(CronExpression::parse("0 15 L * ? *").is_err());
        assert!(CronExpression::parse("0 15 ? * MON *").is_err());
        assert!(CronExpression::parse("0/0 15 * * ? *").is_err());
    }

    #[test]
    fn test_serializes_as_schedule_expression() {
        let cron = CronExpression::daily(15, 0).unwrap();
        assert_eq!(
            serde_json::to_string(&cron).unwrap(),
            "\"cron(0 15 * * ? *)\""
        );
    }
}
