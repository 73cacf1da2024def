//! Declarative condition evaluation with a pluggable operator registry.
//!
//! A condition names a subject (field, deadline, party role) and an operator
//! applied against a value. Operators live in an `OperatorRegistry` the host
//! can extend without touching engine internals; unknown operators evaluate
//! to `false`, never panic. Lists of conditions combine with logical AND.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::calendar::{is_weekend, parse_calendar_date};
use crate::output::{DeadlineInstance, DeadlineStatus};
use crate::party::{PartyMap, PartyMember};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a field value against `value` using a registered operator.
    Field {
        field_id: String,
        operator: String,
        value: Value,
    },
    /// True when the named deadline has been fulfilled.
    DeadlineCompleted { deadline_id: String },
    /// True when the named deadline currently has the given status.
    DeadlineStatus {
        deadline_id: String,
        value: DeadlineStatus,
    },
    /// Compare a role's member count using a registered numeric operator.
    PartyCount {
        role_id: String,
        operator: String,
        value: Value,
    },
    /// Party classification predicates: `any_equals`/`all_equals` over a
    /// role (or all roles when absent), `equals` against the member
    /// currently in context.
    PartyType {
        #[serde(default)]
        role_id: Option<String>,
        operator: String,
        value: String,
    },
}

/// Snapshot of one deadline as conditions see it. Pending deadlines whose
/// date has passed read as overdue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineSnapshot {
    pub date: Option<NaiveDate>,
    pub status: DeadlineStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerInfo {
    pub date: NaiveDate,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u32,
    pub is_weekend: bool,
}

/// Everything a condition can look at while being evaluated.
pub struct EvalContext<'a> {
    pub field_values: &'a serde_json::Map<String, Value>,
    pub deadlines: BTreeMap<String, DeadlineSnapshot>,
    pub trigger: TriggerInfo,
    pub today: NaiveDate,
    pub current_deadline_id: &'a str,
    pub parties: &'a PartyMap,
    pub party_member: Option<&'a PartyMember>,
}

/// Build an evaluation context from a partially-built output's pieces.
pub fn build_context<'a>(
    field_values: &'a serde_json::Map<String, Value>,
    parties: &'a PartyMap,
    deadlines: &[DeadlineInstance],
    trigger_date: NaiveDate,
    now: DateTime<Utc>,
    current_deadline_id: &'a str,
    party_member: Option<&'a PartyMember>,
) -> EvalContext<'a> {
    let today = now.date_naive();
    let snapshots = deadlines
        .iter()
        .map(|d| {
            let status = match (d.status, d.date) {
                (DeadlineStatus::Pending, Some(date)) if date < today => DeadlineStatus::Overdue,
                (status, _) => status,
            };
            (
                d.id.clone(),
                DeadlineSnapshot {
                    date: d.date,
                    status,
                },
            )
        })
        .collect();
    EvalContext {
        field_values,
        deadlines: snapshots,
        trigger: TriggerInfo {
            date: trigger_date,
            day_of_week: trigger_date.weekday().num_days_from_sunday(),
            is_weekend: is_weekend(trigger_date),
        },
        today,
        current_deadline_id,
        parties,
        party_member,
    }
}

impl EvalContext<'_> {
    /// Snapshot lookup that also answers for party-expanded instances when
    /// asked about their definition id.
    pub fn deadline(&self, id: &str) -> Option<DeadlineSnapshot> {
        if let Some(snapshot) = self.deadlines.get(id) {
            return Some(*snapshot);
        }
        let prefix = format!("{id}_");
        self.deadlines
            .iter()
            .find(|(key, _)| key.starts_with(&prefix))
            .map(|(_, snapshot)| *snapshot)
    }
}

pub type OperatorFn = Arc<dyn Fn(&Value, &Value, &EvalContext<'_>) -> bool + Send + Sync>;

/// Named operator table. The engine installs its default set; hosts may
/// register more or replace existing ones.
#[derive(Clone)]
pub struct OperatorRegistry {
    ops: HashMap<String, OperatorFn>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("OperatorRegistry")
            .field("operators", &names)
            .finish()
    }
}

impl OperatorRegistry {
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, op: F)
    where
        F: Fn(&Value, &Value, &EvalContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.ops.insert(name.into(), Arc::new(op));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    /// Apply a named operator. Unknown names evaluate to `false`.
    pub fn apply(&self, name: &str, lhs: &Value, rhs: &Value, ctx: &EvalContext<'_>) -> bool {
        match self.ops.get(name) {
            Some(op) => op(lhs, rhs, ctx),
            None => {
                tracing::debug!(operator = name, "unknown condition operator");
                false
            }
        }
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        install_builtin_operators(&mut registry);
        registry
    }
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_calendar_date)
}

fn as_days(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn signed_days_from_today(value: &Value, ctx: &EvalContext<'_>) -> Option<i64> {
    as_date(value).map(|date| (date - ctx.today).num_days())
}

fn weekday_of(value: &Value) -> Option<u32> {
    as_date(value).map(|d| d.weekday().num_days_from_sunday())
}

fn install_builtin_operators(registry: &mut OperatorRegistry) {
    registry.register("equals", |lhs, rhs, _| lhs == rhs);
    registry.register("not_equals", |lhs, rhs, _| lhs != rhs);
    registry.register("in", |lhs, rhs, _| {
        rhs.as_array().is_some_and(|values| values.contains(lhs))
    });
    registry.register("not_in", |lhs, rhs, _| {
        rhs.as_array().is_some_and(|values| !values.contains(lhs))
    });
    registry.register("greater_than", |lhs, rhs, _| {
        match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    });
    registry.register("less_than", |lhs, rhs, _| {
        match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    });

    // Date comparisons. The left-hand side is the subject value, the
    // right-hand side the condition's value.
    registry.register("date_before", |lhs, rhs, _| {
        matches!((as_date(lhs), as_date(rhs)), (Some(a), Some(b)) if a < b)
    });
    registry.register("date_after", |lhs, rhs, _| {
        matches!((as_date(lhs), as_date(rhs)), (Some(a), Some(b)) if a > b)
    });
    registry.register("date_equals", |lhs, rhs, _| {
        matches!((as_date(lhs), as_date(rhs)), (Some(a), Some(b)) if a == b)
    });
    registry.register("date_between", |lhs, rhs, _| {
        let Some(date) = as_date(lhs) else { return false };
        let Some(range) = rhs.as_array() else {
            return false;
        };
        let (Some(start), Some(end)) = (
            range.first().and_then(as_date),
            range.get(1).and_then(as_date),
        ) else {
            return false;
        };
        start <= date && date <= end
    });

    // Relative-day predicates against the context's "today".
    registry.register("days_until", |lhs, rhs, ctx| {
        matches!(
            (signed_days_from_today(lhs, ctx), as_days(rhs)),
            (Some(a), Some(b)) if a == b
        )
    });
    registry.register("days_since", |lhs, rhs, ctx| {
        matches!(
            (signed_days_from_today(lhs, ctx), as_days(rhs)),
            (Some(a), Some(b)) if -a == b
        )
    });
    registry.register("within_days", |lhs, rhs, ctx| {
        matches!(
            (signed_days_from_today(lhs, ctx), as_days(rhs)),
            (Some(a), Some(b)) if a.abs() <= b
        )
    });
    registry.register("beyond_days", |lhs, rhs, ctx| {
        matches!(
            (signed_days_from_today(lhs, ctx), as_days(rhs)),
            (Some(a), Some(b)) if a.abs() > b
        )
    });
    registry.register("within_next_days", |lhs, rhs, ctx| {
        matches!(
            (signed_days_from_today(lhs, ctx), as_days(rhs)),
            (Some(a), Some(b)) if a >= 0 && a <= b
        )
    });
    registry.register("within_last_days", |lhs, rhs, ctx| {
        matches!(
            (signed_days_from_today(lhs, ctx), as_days(rhs)),
            (Some(a), Some(b)) if a <= 0 && -a <= b
        )
    });

    // Weekday predicates (0 = Sunday .. 6 = Saturday).
    registry.register("day_of_week", |lhs, rhs, _| {
        matches!(
            (weekday_of(lhs), as_days(rhs)),
            (Some(a), Some(b)) if i64::from(a) == b
        )
    });
    registry.register("is_weekend", |lhs, _, _| {
        as_date(lhs).is_some_and(is_weekend)
    });
    registry.register("is_weekday", |lhs, _, _| {
        as_date(lhs).is_some_and(|d| !is_weekend(d))
    });
    registry.register("is_monday", |lhs, _, _| weekday_of(lhs) == Some(1));
    registry.register("is_friday", |lhs, _, _| weekday_of(lhs) == Some(5));
}

/// Evaluate a single condition.
pub fn evaluate_condition(
    condition: &Condition,
    ctx: &EvalContext<'_>,
    registry: &OperatorRegistry,
) -> bool {
    match condition {
        Condition::Field {
            field_id,
            operator,
            value,
        } => {
            let subject = ctx.field_values.get(field_id).unwrap_or(&Value::Null);
            registry.apply(operator, subject, value, ctx)
        }
        Condition::DeadlineCompleted { deadline_id } => ctx
            .deadline(deadline_id)
            .is_some_and(|d| d.status == DeadlineStatus::Fulfilled),
        Condition::DeadlineStatus { deadline_id, value } => {
            ctx.deadline(deadline_id).is_some_and(|d| d.status == *value)
        }
        Condition::PartyCount {
            role_id,
            operator,
            value,
        } => {
            let count = ctx.parties.get(role_id).map_or(0, Vec::len);
            registry.apply(operator, &Value::from(count as u64), value, ctx)
        }
        Condition::PartyType {
            role_id,
            operator,
            value,
        } => evaluate_party_type(role_id.as_deref(), operator, value, ctx),
    }
}

fn evaluate_party_type(
    role_id: Option<&str>,
    operator: &str,
    value: &str,
    ctx: &EvalContext<'_>,
) -> bool {
    let members = |role: Option<&str>| -> Vec<&PartyMember> {
        match role {
            Some(role) => ctx.parties.get(role).into_iter().flatten().collect(),
            None => ctx.parties.values().flatten().collect(),
        }
    };
    match operator {
        "any_equals" => members(role_id).iter().any(|m| m.kind == value),
        "all_equals" => {
            let members = members(role_id);
            !members.is_empty() && members.iter().all(|m| m.kind == value)
        }
        "equals" => ctx.party_member.is_some_and(|m| m.kind == value),
        _ => false,
    }
}

/// AND over a list; an empty list is vacuously true.
pub fn evaluate_all(
    conditions: &[Condition],
    ctx: &EvalContext<'_>,
    registry: &OperatorRegistry,
) -> bool {
    conditions
        .iter()
        .all(|c| evaluate_condition(c, ctx, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx_with_field<'a>(
        field_values: &'a serde_json::Map<String, Value>,
        parties: &'a PartyMap,
    ) -> EvalContext<'a> {
        build_context(
            field_values,
            parties,
            &[],
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            "d_current",
            None,
        )
    }

    fn fields(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn field_equals_and_membership() {
        let fields = fields(&[("f_track", json!("fast"))]);
        let parties = PartyMap::new();
        let ctx = ctx_with_field(&fields, &parties);
        let registry = OperatorRegistry::default();

        let eq = Condition::Field {
            field_id: "f_track".to_string(),
            operator: "equals".to_string(),
            value: json!("fast"),
        };
        assert!(evaluate_condition(&eq, &ctx, &registry));

        let member = Condition::Field {
            field_id: "f_track".to_string(),
            operator: "in".to_string(),
            value: json!(["slow", "fast"]),
        };
        assert!(evaluate_condition(&member, &ctx, &registry));
    }

    #[test]
    fn unknown_operator_is_false_not_a_panic() {
        let fields = fields(&[("f_x", json!(1))]);
        let parties = PartyMap::new();
        let ctx = ctx_with_field(&fields, &parties);
        let registry = OperatorRegistry::default();

        let cond = Condition::Field {
            field_id: "f_x".to_string(),
            operator: "telepathically_equals".to_string(),
            value: json!(1),
        };
        assert!(!evaluate_condition(&cond, &ctx, &registry));
    }

    #[test]
    fn relative_day_predicates_use_context_today() {
        // today = 2024-01-01; field date 10 days out
        let fields = fields(&[("f_hearing", json!("2024-01-11"))]);
        let parties = PartyMap::new();
        let ctx = ctx_with_field(&fields, &parties);
        let registry = OperatorRegistry::default();

        let until = Condition::Field {
            field_id: "f_hearing".to_string(),
            operator: "days_until".to_string(),
            value: json!(10),
        };
        assert!(evaluate_condition(&until, &ctx, &registry));

        let within = Condition::Field {
            field_id: "f_hearing".to_string(),
            operator: "within_next_days".to_string(),
            value: json!(14),
        };
        assert!(evaluate_condition(&within, &ctx, &registry));

        let last = Condition::Field {
            field_id: "f_hearing".to_string(),
            operator: "within_last_days".to_string(),
            value: json!(14),
        };
        assert!(!evaluate_condition(&last, &ctx, &registry));
    }

    #[test]
    fn weekday_predicates() {
        let fields = fields(&[("f_date", json!("2024-01-06"))]); // Saturday
        let parties = PartyMap::new();
        let ctx = ctx_with_field(&fields, &parties);
        let registry = OperatorRegistry::default();

        for (operator, value, expected) in [
            ("is_weekend", json!(null), true),
            ("is_weekday", json!(null), false),
            ("day_of_week", json!(6), true),
            ("is_monday", json!(null), false),
        ] {
            let cond = Condition::Field {
                field_id: "f_date".to_string(),
                operator: operator.to_string(),
                value,
            };
            assert_eq!(evaluate_condition(&cond, &ctx, &registry), expected, "{operator}");
        }
    }

    #[test]
    fn date_between_is_inclusive() {
        let fields = fields(&[("f_date", json!("2024-02-15"))]);
        let parties = PartyMap::new();
        let ctx = ctx_with_field(&fields, &parties);
        let registry = OperatorRegistry::default();

        let cond = Condition::Field {
            field_id: "f_date".to_string(),
            operator: "date_between".to_string(),
            value: json!(["2024-02-15", "2024-03-01"]),
        };
        assert!(evaluate_condition(&cond, &ctx, &registry));
    }

    #[test]
    fn party_count_and_type_predicates() {
        let fields = serde_json::Map::new();
        let mut parties = PartyMap::new();
        parties.insert(
            "role_respondent".to_string(),
            vec![
                PartyMember::new("pm_1", "Jane", "role_respondent").with_kind("individual"),
                PartyMember::new("pm_2", "Acme", "role_respondent").with_kind("company"),
            ],
        );
        let ctx = ctx_with_field(&fields, &parties);
        let registry = OperatorRegistry::default();

        let count = Condition::PartyCount {
            role_id: "role_respondent".to_string(),
            operator: "greater_than".to_string(),
            value: json!(1),
        };
        assert!(evaluate_condition(&count, &ctx, &registry));

        let any = Condition::PartyType {
            role_id: Some("role_respondent".to_string()),
            operator: "any_equals".to_string(),
            value: "company".to_string(),
        };
        assert!(evaluate_condition(&any, &ctx, &registry));

        let all = Condition::PartyType {
            role_id: Some("role_respondent".to_string()),
            operator: "all_equals".to_string(),
            value: "company".to_string(),
        };
        assert!(!evaluate_condition(&all, &ctx, &registry));
    }

    #[test]
    fn current_party_member_equals() {
        let fields = serde_json::Map::new();
        let parties = PartyMap::new();
        let member = PartyMember::new("pm_1", "Jane", "role_respondent").with_kind("individual");
        let mut ctx = ctx_with_field(&fields, &parties);
        ctx.party_member = Some(&member);
        let registry = OperatorRegistry::default();

        let cond = Condition::PartyType {
            role_id: None,
            operator: "equals".to_string(),
            value: "individual".to_string(),
        };
        assert!(evaluate_condition(&cond, &ctx, &registry));
    }

    #[test]
    fn host_registered_operator_is_usable() {
        let fields = fields(&[("f_amount", json!(150))]);
        let parties = PartyMap::new();
        let ctx = ctx_with_field(&fields, &parties);

        let mut registry = OperatorRegistry::default();
        registry.register("divisible_by", |lhs, rhs, _| {
            match (lhs.as_i64(), rhs.as_i64()) {
                (Some(a), Some(b)) if b != 0 => a % b == 0,
                _ => false,
            }
        });

        let cond = Condition::Field {
            field_id: "f_amount".to_string(),
            operator: "divisible_by".to_string(),
            value: json!(50),
        };
        assert!(evaluate_condition(&cond, &ctx, &registry));
    }

    #[test]
    fn condition_list_is_logical_and() {
        let fields = fields(&[("f_a", json!(1)), ("f_b", json!(2))]);
        let parties = PartyMap::new();
        let ctx = ctx_with_field(&fields, &parties);
        let registry = OperatorRegistry::default();

        let both = vec![
            Condition::Field {
                field_id: "f_a".to_string(),
                operator: "equals".to_string(),
                value: json!(1),
            },
            Condition::Field {
                field_id: "f_b".to_string(),
                operator: "equals".to_string(),
                value: json!(3),
            },
        ];
        assert!(!evaluate_all(&both, &ctx, &registry));
        assert!(evaluate_all(&[], &ctx, &registry));
    }

    #[test]
    fn condition_json_wire_shape() {
        let cond = Condition::Field {
            field_id: "f_track".to_string(),
            operator: "equals".to_string(),
            value: json!("fast"),
        };
        let json = serde_json::to_string(&cond).unwrap();
        assert!(json.contains("\"type\":\"field\""));

        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cond);
    }
}
