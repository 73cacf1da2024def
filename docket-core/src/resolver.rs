//! Symbolic reference resolution: trigger sentinel, deadline ids, field ids.
//!
//! Targets are strings with a namespace prefix. `_trigger_` is the anchoring
//! event; `d_` names another deadline; `f_` names a date-valued field. When a
//! deadline is being expanded for a specific party member, deadline lookups
//! prefer that member's instance before falling back to the shared one.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::calendar::parse_calendar_date;
use crate::error::EngineError;

pub const TRIGGER_ID: &str = "_trigger_";
pub const DEADLINE_PREFIX: &str = "d_";
pub const FIELD_PREFIX: &str = "f_";

/// Resolved dates keyed by instance id, built up as generation walks the
/// dependency order.
pub type ResolvedDates = BTreeMap<String, NaiveDate>;

pub fn is_deadline_ref(target: &str) -> bool {
    target.starts_with(DEADLINE_PREFIX)
}

pub fn is_field_ref(target: &str) -> bool {
    target.starts_with(FIELD_PREFIX)
}

/// Resolve a dependency target to a concrete date.
///
/// Deadline targets resolve against already-computed instances; with a
/// `party_member_id` the member-specific instance `{target}_{member}` wins
/// over the shared `{target}`. Field targets parse the field's value as a
/// calendar date. Anything unresolvable is an error, not a silent skip.
pub fn resolve_target_date(
    target: &str,
    trigger_date: NaiveDate,
    resolved: &ResolvedDates,
    field_values: &serde_json::Map<String, Value>,
    party_member_id: Option<&str>,
) -> Result<NaiveDate, EngineError> {
    if target == TRIGGER_ID {
        return Ok(trigger_date);
    }
    if is_deadline_ref(target) {
        if let Some(member_id) = party_member_id {
            let keyed = format!("{target}_{member_id}");
            if let Some(date) = resolved.get(&keyed) {
                return Ok(*date);
            }
        }
        return resolved
            .get(target)
            .copied()
            .ok_or_else(|| EngineError::UnresolvedReference(target.to_string()));
    }
    if is_field_ref(target) {
        return field_values
            .get(target)
            .and_then(|value| value.as_str())
            .and_then(parse_calendar_date)
            .ok_or_else(|| EngineError::UnresolvedReference(target.to_string()));
    }
    Err(EngineError::UnresolvedReference(target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn trigger_sentinel_resolves_to_trigger_date() {
        let resolved = ResolvedDates::new();
        let fields = serde_json::Map::new();
        assert_eq!(
            resolve_target_date(TRIGGER_ID, d("2024-01-01"), &resolved, &fields, None),
            Ok(d("2024-01-01"))
        );
    }

    #[test]
    fn deadline_ref_prefers_party_instance() {
        let mut resolved = ResolvedDates::new();
        resolved.insert("d_serve".to_string(), d("2024-02-01"));
        resolved.insert("d_serve_pm_2".to_string(), d("2024-02-05"));
        let fields = serde_json::Map::new();

        assert_eq!(
            resolve_target_date("d_serve", d("2024-01-01"), &resolved, &fields, Some("pm_2")),
            Ok(d("2024-02-05"))
        );
        assert_eq!(
            resolve_target_date("d_serve", d("2024-01-01"), &resolved, &fields, Some("pm_9")),
            Ok(d("2024-02-01"))
        );
        assert_eq!(
            resolve_target_date("d_serve", d("2024-01-01"), &resolved, &fields, None),
            Ok(d("2024-02-01"))
        );
    }

    #[test]
    fn field_ref_parses_date_values() {
        let resolved = ResolvedDates::new();
        let mut fields = serde_json::Map::new();
        fields.insert("f_hearing".to_string(), json!("2024-03-15T09:00:00Z"));

        assert_eq!(
            resolve_target_date("f_hearing", d("2024-01-01"), &resolved, &fields, None),
            Ok(d("2024-03-15"))
        );
    }

    #[test]
    fn missing_or_malformed_refs_error() {
        let resolved = ResolvedDates::new();
        let mut fields = serde_json::Map::new();
        fields.insert("f_bad".to_string(), json!("soon"));

        for target in ["d_ghost", "f_ghost", "f_bad", "nonsense"] {
            assert_eq!(
                resolve_target_date(target, d("2024-01-01"), &resolved, &fields, None),
                Err(EngineError::UnresolvedReference(target.to_string()))
            );
        }
    }
}
