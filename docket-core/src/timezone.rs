//! Local wall-clock to UTC conversion for reminder scheduling.
//!
//! Conversions go through the IANA zone database (chrono-tz), so DST
//! transitions are handled per zone rather than by a fixed offset. The two
//! awkward cases on transition days: a wall-clock time that never exists
//! (spring-forward gap) shifts one hour later; a time that exists twice
//! (fall-back) takes the earlier instant. Both get a warning so callers can
//! surface the shift.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A UTC instant plus an optional note about how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Localized {
    pub instant: DateTime<Utc>,
    pub warning: Option<String>,
}

/// Parse "HH:MM" wall-clock time.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Parse an IANA zone name. `None` means the caller should fall back to UTC.
pub fn parse_zone(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}

/// Convert a local date and wall-clock time in `tz` to UTC.
pub fn localize_to_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> Localized {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => Localized {
            instant: local.with_timezone(&Utc),
            warning: None,
        },
        LocalResult::Ambiguous(earlier, _later) => Localized {
            instant: earlier.with_timezone(&Utc),
            warning: Some(format!(
                "{naive} occurs twice in {tz}; using the earlier instant"
            )),
        },
        LocalResult::None => {
            // Spring-forward gap: the hour was skipped, so fire an hour later.
            let shifted = naive + chrono::Duration::hours(1);
            let instant = match tz.from_local_datetime(&shifted) {
                LocalResult::Single(local) | LocalResult::Ambiguous(local, _) => {
                    local.with_timezone(&Utc)
                }
                LocalResult::None => Utc.from_utc_datetime(&shifted),
            };
            Localized {
                instant,
                warning: Some(format!(
                    "{naive} does not exist in {tz}; shifted one hour later"
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        parse_time_of_day(s).unwrap()
    }

    #[test]
    fn plain_conversion_applies_the_zone_offset() {
        let tz = parse_zone("Europe/London").unwrap();
        // GMT in January: 09:00 local == 09:00 UTC.
        let winter = localize_to_utc(d("2024-01-15"), t("09:00"), tz);
        assert_eq!(winter.warning, None);
        assert_eq!(
            winter.instant,
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
        );
        // BST in July: 09:00 local == 08:00 UTC.
        let summer = localize_to_utc(d("2024-07-15"), t("09:00"), tz);
        assert_eq!(
            summer.instant,
            Utc.with_ymd_and_hms(2024, 7, 15, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn spring_forward_gap_shifts_an_hour_later() {
        // Europe/London skips 01:00-02:00 on 2024-03-31.
        let tz = parse_zone("Europe/London").unwrap();
        let gap = localize_to_utc(d("2024-03-31"), t("01:30"), tz);
        assert!(gap.warning.is_some());
        // 02:30 BST == 01:30 UTC.
        assert_eq!(
            gap.instant,
            Utc.with_ymd_and_hms(2024, 3, 31, 1, 30, 0).unwrap()
        );
    }

    #[test]
    fn fall_back_ambiguity_takes_the_earlier_instant() {
        // Europe/London repeats 01:00-02:00 on 2024-10-27.
        let tz = parse_zone("Europe/London").unwrap();
        let ambiguous = localize_to_utc(d("2024-10-27"), t("01:30"), tz);
        assert!(ambiguous.warning.is_some());
        // Earlier pass is still BST: 01:30 BST == 00:30 UTC.
        assert_eq!(
            ambiguous.instant,
            Utc.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap()
        );
    }

    #[test]
    fn unknown_zone_is_detectable() {
        assert!(parse_zone("Europe/Atlantis").is_none());
        assert!(parse_zone("America/New_York").is_some());
    }

    #[test]
    fn time_parsing() {
        assert_eq!(parse_time_of_day("09:00"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_time_of_day("23:59"), NaiveTime::from_hms_opt(23, 59, 0));
        assert_eq!(parse_time_of_day("9am"), None);
    }
}
