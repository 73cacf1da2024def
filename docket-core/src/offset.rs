//! Offset arithmetic: count days from a base date, then adjust to a valid day.
//!
//! The walk is two-phase. Phase one counts `days` countable days from the
//! base (skipping days the counting rules ignore; dead days never count),
//! remembering the last visited day the final-date rules already accepted.
//! Phase two validates the landed date: if invalid, forward adjustment steps
//! ahead past counting-ignored days until a valid day appears, while backward
//! adjustment rolls back to the remembered day from the walk. Every loop is
//! bounded; a template that excludes all days yields an error instead of
//! spinning.

use chrono::NaiveDate;

use crate::calendar::{add_days, is_holiday, is_listed, is_weekend, validate_date};
use crate::conditions::{evaluate_all, EvalContext, OperatorRegistry};
use crate::error::EngineError;
use crate::template::{AdjustmentDirection, CalendarDay, CountingRules, DateRules, Offset};

/// Hard ceiling on any calendar walk (four years). Reaching it means the
/// calendar rules exclude every candidate day.
pub const MAX_WALK_DAYS: i64 = 1461;

/// The concrete numbers a deadline's offset resolved to after conditional
/// rules were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOffset<'a> {
    pub days: i64,
    /// A matching conditional rule may redirect the dependency target.
    pub target_override: Option<&'a str>,
}

/// Pick the effective day count: first conditional rule whose conditions all
/// hold wins, then the conditional default, then the static count.
pub fn resolve_offset<'a>(
    offset: &'a Offset,
    ctx: &EvalContext<'_>,
    registry: &OperatorRegistry,
) -> ResolvedOffset<'a> {
    if let Some(conditional) = &offset.conditional {
        for rule in &conditional.rules {
            if evaluate_all(&rule.conditions, ctx, registry) {
                return ResolvedOffset {
                    days: rule.days,
                    target_override: rule.target_id.as_deref(),
                };
            }
        }
        if let Some(days) = conditional.default_days {
            return ResolvedOffset {
                days,
                target_override: None,
            };
        }
    }
    ResolvedOffset {
        days: offset.days,
        target_override: None,
    }
}

/// Whether a day advances the count. Dead days never count.
fn counts(
    date: NaiveDate,
    counting: CountingRules,
    holidays: &[CalendarDay],
    dead_days: &[CalendarDay],
) -> bool {
    if is_listed(date, dead_days) {
        return false;
    }
    if counting.ignore_weekends && is_weekend(date) {
        return false;
    }
    if counting.ignore_holidays && is_holiday(date, holidays) {
        return false;
    }
    true
}

/// Count `days` from `base` (negative counts backward), then adjust the
/// landed date to one the date rules permit.
pub fn compute_offset_date(
    base: NaiveDate,
    days: i64,
    date_rules: DateRules,
    counting_rules: CountingRules,
    holidays: &[CalendarDay],
    dead_days: &[CalendarDay],
) -> Result<NaiveDate, EngineError> {
    let rules = date_rules.day_rules();

    // Zero offset: the base itself, or the nearest valid day in the
    // adjustment direction.
    if days == 0 {
        let step = match date_rules.adjustment_direction {
            AdjustmentDirection::Forward => 1,
            AdjustmentDirection::Backward => -1,
        };
        let mut date = base;
        let mut walked = 0i64;
        while validate_date(date, rules, holidays, dead_days).is_err() {
            walked += 1;
            if walked > MAX_WALK_DAYS {
                return Err(EngineError::UnreachableValidDate {
                    base,
                    limit: MAX_WALK_DAYS,
                });
            }
            date = add_days(date, step);
        }
        return Ok(date);
    }

    let track_valid = date_rules.adjustment_direction == AdjustmentDirection::Backward;
    let step = if days < 0 { -1 } else { 1 };
    let mut remaining = days.abs();
    let mut date = base;
    let mut last_valid: Option<NaiveDate> = None;

    if counting_rules.include_first && counts(base, counting_rules, holidays, dead_days) {
        remaining -= 1;
        if track_valid && validate_date(base, rules, holidays, dead_days).is_ok() {
            last_valid = Some(base);
        }
    }

    let mut walked = 0i64;
    while remaining > 0 {
        walked += 1;
        if walked > MAX_WALK_DAYS {
            return Err(EngineError::UnreachableValidDate {
                base,
                limit: MAX_WALK_DAYS,
            });
        }
        date = add_days(date, step);
        if track_valid && validate_date(date, rules, holidays, dead_days).is_ok() {
            last_valid = Some(date);
        }
        if counts(date, counting_rules, holidays, dead_days) {
            remaining -= 1;
        }
    }

    adjust_to_valid(
        date,
        base,
        last_valid,
        date_rules,
        counting_rules,
        holidays,
        dead_days,
    )
}

/// Resolve an invalid landed date. Forward adjustment steps ahead, passing
/// over days the counting rules ignore, until the date rules accept one.
/// Backward adjustment returns the last valid day the counting walk visited;
/// a walk that visited none fails rather than inventing an earlier date.
fn adjust_to_valid(
    landed: NaiveDate,
    base: NaiveDate,
    last_valid: Option<NaiveDate>,
    date_rules: DateRules,
    counting_rules: CountingRules,
    holidays: &[CalendarDay],
    dead_days: &[CalendarDay],
) -> Result<NaiveDate, EngineError> {
    let rules = date_rules.day_rules();
    if validate_date(landed, rules, holidays, dead_days).is_ok() {
        return Ok(landed);
    }
    match date_rules.adjustment_direction {
        AdjustmentDirection::Forward => {
            let mut date = landed;
            let mut walked = 0i64;
            loop {
                walked += 1;
                if walked > MAX_WALK_DAYS {
                    return Err(EngineError::UnreachableValidDate {
                        base,
                        limit: MAX_WALK_DAYS,
                    });
                }
                date = add_days(date, 1);
                // Days that would not have counted cannot host the deadline
                // either.
                if counting_rules.ignore_weekends && is_weekend(date) {
                    continue;
                }
                if counting_rules.ignore_holidays && is_holiday(date, holidays) {
                    continue;
                }
                if validate_date(date, rules, holidays, dead_days).is_ok() {
                    return Ok(date);
                }
            }
        }
        AdjustmentDirection::Backward => {
            last_valid.ok_or(EngineError::BackwardAdjustmentImpossible(landed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ConditionalOffset, ConditionalOffsetRule};
    use chrono::Duration;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn business_counting() -> CountingRules {
        CountingRules {
            ignore_weekends: true,
            ignore_holidays: true,
            include_first: false,
        }
    }

    #[test]
    fn five_business_days_from_a_monday() {
        // Mon 2024-01-01 + 5 business days lands on Mon 2024-01-08.
        let date = compute_offset_date(
            d("2024-01-01"),
            5,
            DateRules::default(),
            business_counting(),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-08"));
    }

    #[test]
    fn include_first_counts_the_base_day() {
        let counting = CountingRules {
            include_first: true,
            ..CountingRules::default()
        };
        let date = compute_offset_date(
            d("2024-01-01"),
            5,
            DateRules::default(),
            counting,
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-05"));
    }

    #[test]
    fn calendar_days_land_on_weekend_then_adjust_forward() {
        // Mon + 5 calendar days = Sat; weekends disallowed, forward => Mon.
        let date = compute_offset_date(
            d("2024-01-01"),
            5,
            DateRules::default(),
            CountingRules::default(),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-08"));
    }

    #[test]
    fn backward_adjustment_picks_the_prior_valid_day() {
        let rules = DateRules {
            adjustment_direction: AdjustmentDirection::Backward,
            ..DateRules::default()
        };
        // Wed 2024-01-03 + 3 calendar days = Sat; backward => Fri.
        let date = compute_offset_date(
            d("2024-01-03"),
            3,
            rules,
            CountingRules::default(),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-05"));
    }

    #[test]
    fn backward_adjustment_fails_when_the_walk_saw_no_valid_day() {
        let rules = DateRules {
            adjustment_direction: AdjustmentDirection::Backward,
            ..DateRules::default()
        };
        // Fri 2024-01-05 + 1 = Sat; the walk only visited that Saturday.
        let err = compute_offset_date(
            d("2024-01-05"),
            1,
            rules,
            CountingRules::default(),
            &[],
            &[],
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::BackwardAdjustmentImpossible(d("2024-01-06"))
        );
    }

    #[test]
    fn negative_offset_backward_adjustment_returns_to_a_visited_day() {
        let rules = DateRules {
            adjustment_direction: AdjustmentDirection::Backward,
            ..DateRules::default()
        };
        // Wed 2024-01-10 - 3 calendar days = Sun 2024-01-07. The descending
        // walk passed Tue 9th and Mon 8th; the Monday was visited last.
        let date = compute_offset_date(
            d("2024-01-10"),
            -3,
            rules,
            CountingRules::default(),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-08"));
    }

    #[test]
    fn include_first_backward_can_return_to_the_base() {
        let rules = DateRules {
            adjustment_direction: AdjustmentDirection::Backward,
            ..DateRules::default()
        };
        let counting = CountingRules {
            include_first: true,
            ..CountingRules::default()
        };
        // Fri 2024-01-05 counts as day one and is itself valid; landing on
        // Sat rolls back to it instead of failing.
        let date = compute_offset_date(d("2024-01-05"), 2, rules, counting, &[], &[]).unwrap();
        assert_eq!(date, d("2024-01-05"));
    }

    #[test]
    fn forward_adjustment_skips_counting_ignored_days() {
        let holidays = vec![CalendarDay {
            name: "Twelfth Night".to_string(),
            date: d("2024-01-05"),
        }];
        let rules = DateRules {
            allow_weekends: true,
            allow_holidays: false,
            adjustment_direction: AdjustmentDirection::Forward,
        };
        let counting = CountingRules {
            ignore_weekends: true,
            ignore_holidays: false,
            include_first: false,
        };
        // Thu 2024-01-04 + 1 lands on the Fri 5th holiday. The weekend is
        // allowed as a final date but ignored while counting, so the
        // adjustment passes over it to Mon 2024-01-08.
        let date = compute_offset_date(d("2024-01-04"), 1, rules, counting, &holidays, &[])
            .unwrap();
        assert_eq!(date, d("2024-01-08"));
    }

    #[test]
    fn negative_offsets_count_backward() {
        // Wed 2024-01-10 - 2 business days = Mon 2024-01-08.
        let date = compute_offset_date(
            d("2024-01-10"),
            -2,
            DateRules::default(),
            business_counting(),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-08"));
    }

    #[test]
    fn holidays_extend_the_count_and_the_adjustment() {
        let holidays = vec![CalendarDay {
            name: "Epiphany Monday".to_string(),
            date: d("2024-01-08"),
        }];
        // 5 business days from Mon 2024-01-01 skips the Mon 8th holiday.
        let date = compute_offset_date(
            d("2024-01-01"),
            5,
            DateRules::default(),
            business_counting(),
            &holidays,
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-09"));
    }

    #[test]
    fn all_days_excluded_is_an_error_not_a_hang() {
        let base = d("2024-01-01");
        let dead_days: Vec<CalendarDay> = (0..=MAX_WALK_DAYS + 2)
            .map(|i| CalendarDay {
                name: format!("recess {i}"),
                date: base + Duration::days(i),
            })
            .collect();
        let err = compute_offset_date(
            base,
            1,
            DateRules::default(),
            CountingRules::default(),
            &[],
            &dead_days,
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::UnreachableValidDate {
                base,
                limit: MAX_WALK_DAYS,
            }
        );
    }

    #[test]
    fn zero_days_still_adjusts_to_a_valid_day() {
        // Sat 2024-01-06 with zero offset moves forward off the weekend.
        let date = compute_offset_date(
            d("2024-01-06"),
            0,
            DateRules::default(),
            CountingRules::default(),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(date, d("2024-01-08"));
    }

    #[test]
    fn conditional_rules_pick_first_match_then_default() {
        use crate::conditions::{build_context, Condition};
        use crate::party::PartyMap;
        use chrono::{TimeZone, Utc};
        use serde_json::json;

        let offset = Offset {
            days: 14,
            date_rules: DateRules::default(),
            counting_rules: CountingRules::default(),
            conditional: Some(ConditionalOffset {
                rules: vec![
                    ConditionalOffsetRule {
                        conditions: vec![Condition::Field {
                            field_id: "f_track".to_string(),
                            operator: "equals".to_string(),
                            value: json!("fast"),
                        }],
                        days: 7,
                        target_id: Some("d_other".to_string()),
                    },
                    ConditionalOffsetRule {
                        conditions: vec![Condition::Field {
                            field_id: "f_track".to_string(),
                            operator: "equals".to_string(),
                            value: json!("slow"),
                        }],
                        days: 28,
                        target_id: None,
                    },
                ],
                default_days: Some(21),
            }),
        };
        let registry = OperatorRegistry::default();
        let parties = PartyMap::new();

        let mut fields = serde_json::Map::new();
        fields.insert("f_track".to_string(), json!("fast"));
        let ctx = build_context(
            &fields,
            &parties,
            &[],
            d("2024-01-01"),
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            "d_x",
            None,
        );
        let resolved = resolve_offset(&offset, &ctx, &registry);
        assert_eq!(resolved.days, 7);
        assert_eq!(resolved.target_override, Some("d_other"));

        let mut fields = serde_json::Map::new();
        fields.insert("f_track".to_string(), json!("neither"));
        let ctx = build_context(
            &fields,
            &parties,
            &[],
            d("2024-01-01"),
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            "d_x",
            None,
        );
        let resolved = resolve_offset(&offset, &ctx, &registry);
        assert_eq!(resolved.days, 21);
        assert_eq!(resolved.target_override, None);
    }
}
