//! Calendar rules: weekend/holiday/dead-day predicates and day arithmetic.
//!
//! Everything here works on `NaiveDate` — deadline dates never carry a time
//! component. Holiday and dead-day membership compares whole calendar days.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::template::CalendarDay;

/// Why a date failed validation, in check-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateInvalidReason {
    DeadDay,
    WeekendNotAllowed,
    HolidayNotAllowed,
}

impl fmt::Display for DateInvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateInvalidReason::DeadDay => write!(f, "date falls on a dead day"),
            DateInvalidReason::WeekendNotAllowed => write!(f, "weekends are not allowed"),
            DateInvalidReason::HolidayNotAllowed => write!(f, "holidays are not allowed"),
        }
    }
}

/// The subset of date rules that `validate_date` cares about. Both trigger
/// rules and per-deadline rules project down to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRules {
    pub allow_weekends: bool,
    pub allow_holidays: bool,
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_listed(date: NaiveDate, days: &[CalendarDay]) -> bool {
    days.iter().any(|d| d.date == date)
}

pub fn is_holiday(date: NaiveDate, holidays: &[CalendarDay]) -> bool {
    is_listed(date, holidays)
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

/// Parse a calendar date from a string, tolerating a trailing time component
/// (field values often arrive as full RFC3339 timestamps).
pub fn parse_calendar_date(s: &str) -> Option<NaiveDate> {
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Check a date against day rules. Dead days are checked first, then
/// weekends, then holidays.
pub fn validate_date(
    date: NaiveDate,
    rules: DayRules,
    holidays: &[CalendarDay],
    dead_days: &[CalendarDay],
) -> Result<(), DateInvalidReason> {
    if is_listed(date, dead_days) {
        return Err(DateInvalidReason::DeadDay);
    }
    if !rules.allow_weekends && is_weekend(date) {
        return Err(DateInvalidReason::WeekendNotAllowed);
    }
    if !rules.allow_holidays && is_holiday(date, holidays) {
        return Err(DateInvalidReason::HolidayNotAllowed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(name: &str, date: &str) -> CalendarDay {
        CalendarDay {
            name: name.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn weekend_detection() {
        assert!(is_weekend(d("2024-01-06"))); // Saturday
        assert!(is_weekend(d("2024-01-07"))); // Sunday
        assert!(!is_weekend(d("2024-01-08"))); // Monday
    }

    #[test]
    fn dead_day_takes_priority_over_weekend_and_holiday() {
        let holidays = vec![day("New Year", "2024-01-06")];
        let dead = vec![day("Court recess", "2024-01-06")];
        let rules = DayRules {
            allow_weekends: false,
            allow_holidays: false,
        };
        // 2024-01-06 is a Saturday, a holiday, and a dead day at once.
        assert_eq!(
            validate_date(d("2024-01-06"), rules, &holidays, &dead),
            Err(DateInvalidReason::DeadDay)
        );
    }

    #[test]
    fn weekend_checked_before_holiday() {
        let holidays = vec![day("Boxing Day", "2024-01-06")];
        let rules = DayRules {
            allow_weekends: false,
            allow_holidays: false,
        };
        assert_eq!(
            validate_date(d("2024-01-06"), rules, &holidays, &[]),
            Err(DateInvalidReason::WeekendNotAllowed)
        );
    }

    #[test]
    fn allowed_flags_permit_the_date() {
        let holidays = vec![day("Labour Day", "2024-05-01")];
        let rules = DayRules {
            allow_weekends: true,
            allow_holidays: true,
        };
        assert!(validate_date(d("2024-05-01"), rules, &holidays, &[]).is_ok());
        assert!(validate_date(d("2024-01-06"), rules, &holidays, &[]).is_ok());
    }

    #[test]
    fn parse_tolerates_timestamps() {
        assert_eq!(parse_calendar_date("2024-03-15"), Some(d("2024-03-15")));
        assert_eq!(
            parse_calendar_date("2024-03-15T10:30:00Z"),
            Some(d("2024-03-15"))
        );
        assert_eq!(parse_calendar_date("not a date"), None);
    }

    #[test]
    fn add_days_signed() {
        assert_eq!(add_days(d("2024-01-01"), 5), d("2024-01-06"));
        assert_eq!(add_days(d("2024-01-01"), -1), d("2023-12-31"));
    }
}
