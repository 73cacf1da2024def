//! Template wire types: the immutable procedural definition a caller supplies.
//!
//! A template is a directed, conditionally-branching graph of temporal
//! obligations plus the calendar exceptions, user-input fields, and party
//! configuration they reference. The engine never mutates a template.
//!
//! serde-ready for JSON transport and persistence; deterministic round-trips.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::DayRules;
use crate::conditions::Condition;
use crate::resolver::{DEADLINE_PREFIX, FIELD_PREFIX, TRIGGER_ID};

/// A named calendar exception (holiday or dead day).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub name: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Select,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    pub label: String,
}

/// A typed user input the template asks for at generation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<FieldOption>,
}

impl Field {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            label: None,
            kind,
            required: false,
            default_value: None,
            options: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Whether the trigger date itself may fall on a weekend/holiday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDateRules {
    pub allow_weekends: bool,
    pub allow_holidays: bool,
}

impl TriggerDateRules {
    pub fn day_rules(&self) -> DayRules {
        DayRules {
            allow_weekends: self.allow_weekends,
            allow_holidays: self.allow_holidays,
        }
    }
}

impl Default for TriggerDateRules {
    fn default() -> Self {
        Self {
            allow_weekends: true,
            allow_holidays: true,
        }
    }
}

/// Which side of the matter a party role sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCount {
    pub minimum: usize,
    pub maximum: Option<usize>,
    #[serde(default)]
    pub default: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RoleLabels {
    pub singular: String,
    pub plural: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRole {
    pub id: String,
    pub name: String,
    pub side: Side,
    #[serde(default)]
    pub labels: RoleLabels,
    pub member_count: MemberCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub roles: Vec<PartyRole>,
    #[serde(default)]
    pub allow_multiple_per_role: bool,
    #[serde(default)]
    pub representation_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentDirection {
    Forward,
    Backward,
}

/// Rules for the *final* date: what it may fall on, and which way to move
/// when it may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRules {
    pub allow_weekends: bool,
    pub allow_holidays: bool,
    pub adjustment_direction: AdjustmentDirection,
}

impl DateRules {
    pub fn day_rules(&self) -> DayRules {
        DayRules {
            allow_weekends: self.allow_weekends,
            allow_holidays: self.allow_holidays,
        }
    }
}

impl Default for DateRules {
    fn default() -> Self {
        Self {
            allow_weekends: false,
            allow_holidays: false,
            adjustment_direction: AdjustmentDirection::Forward,
        }
    }
}

/// Rules for the counting walk: which days are skipped while counting and
/// whether the starting day itself counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CountingRules {
    #[serde(default)]
    pub ignore_weekends: bool,
    #[serde(default)]
    pub ignore_holidays: bool,
    #[serde(default)]
    pub include_first: bool,
}

/// A ranked conditional override of the default day count. The first rule
/// whose conditions all hold wins; it may also redirect the base target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOffsetRule {
    pub conditions: Vec<Condition>,
    pub days: i64,
    #[serde(default)]
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOffset {
    #[serde(default)]
    pub rules: Vec<ConditionalOffsetRule>,
    /// Day count to use when no rule matches; falls back to `Offset::days`
    /// when absent.
    #[serde(default)]
    pub default_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    pub days: i64,
    #[serde(default)]
    pub date_rules: DateRules,
    #[serde(default)]
    pub counting_rules: CountingRules,
    #[serde(default)]
    pub conditional: Option<ConditionalOffset>,
}

impl Offset {
    pub fn days(days: i64) -> Self {
        Self {
            days,
            date_rules: DateRules::default(),
            counting_rules: CountingRules::default(),
            conditional: None,
        }
    }
}

/// A conditional override of the dependency target, selected by rule
/// evaluation in definition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyOverride {
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub conditions: Vec<Condition>,
    pub target_id: String,
}

fn enabled_default() -> bool {
    true
}

/// The symbolic base a deadline is computed from: the trigger sentinel,
/// another deadline (`d_` prefix), or a date field (`f_` prefix).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub target_id: String,
    #[serde(default)]
    pub conditions: Vec<DependencyOverride>,
}

impl Dependency {
    pub fn on_trigger() -> Self {
        Self {
            target_id: TRIGGER_ID.to_string(),
            conditions: Vec::new(),
        }
    }

    pub fn on(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MultiplicityKind {
    #[default]
    Single,
    PerParty,
    PerSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideFilter {
    First,
    Second,
    All,
}

/// How a single definition fans out into per-party instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Multiplicity {
    #[serde(rename = "type", default)]
    pub kind: MultiplicityKind,
    /// Expand over this role's members.
    #[serde(default)]
    pub role_id: Option<String>,
    /// Or over every member of roles on this side.
    #[serde(default)]
    pub side: Option<SideFilter>,
    /// Restrict to the parties the caller declared they represent.
    #[serde(default)]
    pub apply_to_representing: bool,
}

/// Sub-process gating: whether SPAWN is permitted from this deadline and
/// under which conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Applications {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderPriority {
    Moderate,
    Urgent,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderChannel {
    Push,
    Local,
    Email,
}

/// A reminder relative to its deadline: `offset_days` is usually negative
/// (before the deadline) or zero (day of).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDefinition {
    pub id: String,
    pub offset_days: i64,
    pub priority: ReminderPriority,
    #[serde(default)]
    pub channels: Vec<ReminderChannel>,
    /// Local "HH:MM"; the projection settings supply a default when absent.
    #[serde(default)]
    pub time_of_day: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeadlineKind {
    #[default]
    Offset,
    #[serde(other)]
    Unknown,
}

/// One obligation in the template's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: DeadlineKind,
    /// Dynamic deadlines are recomputed when an upstream dependency changes.
    #[serde(default)]
    pub dynamic: bool,
    pub dependency: Dependency,
    pub offset: Offset,
    /// Activation conditions; if present and false the deadline is inactive
    /// and carries no date.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Same-generation gating: ids of deadlines that must have produced a
    /// date earlier in this pass.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub multiplicity: Option<Multiplicity>,
    #[serde(default)]
    pub applications: Option<Applications>,
    #[serde(default)]
    pub reminders: Vec<ReminderDefinition>,
    /// Per-party interpolation templates (`{{party.name}}` etc.).
    #[serde(default)]
    pub name_template: Option<String>,
    #[serde(default)]
    pub description_template: Option<String>,
}

impl DeadlineDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            kind: DeadlineKind::Offset,
            dynamic: false,
            dependency: Dependency::on_trigger(),
            offset: Offset::days(0),
            conditions: Vec::new(),
            dependencies: Vec::new(),
            multiplicity: None,
            applications: None,
            reminders: Vec::new(),
            name_template: None,
            description_template: None,
        }
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependency = dependency;
        self
    }

    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = offset;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.multiplicity = Some(multiplicity);
        self
    }

    /// Every deadline-prefixed id this definition can reference: the default
    /// target, conditional dependency overrides, conditional offset target
    /// overrides, and the gating list.
    pub fn referenced_deadline_ids(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        if self.dependency.target_id.starts_with(DEADLINE_PREFIX) {
            refs.push(self.dependency.target_id.as_str());
        }
        for rule in &self.dependency.conditions {
            if rule.target_id.starts_with(DEADLINE_PREFIX) {
                refs.push(rule.target_id.as_str());
            }
        }
        if let Some(conditional) = &self.offset.conditional {
            for rule in &conditional.rules {
                if let Some(target) = &rule.target_id {
                    if target.starts_with(DEADLINE_PREFIX) {
                        refs.push(target.as_str());
                    }
                }
            }
        }
        for dep in &self.dependencies {
            refs.push(dep.as_str());
        }
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

/// The immutable procedural definition: identity, fields, calendar
/// exceptions, party configuration, and the deadline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub holidays: Vec<CalendarDay>,
    #[serde(default)]
    pub dead_days: Vec<CalendarDay>,
    #[serde(default)]
    pub parties: PartyConfig,
    #[serde(default)]
    pub trigger_date_rules: TriggerDateRules,
    #[serde(default)]
    pub deadlines: Vec<DeadlineDefinition>,
}

impl Template {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            version: version.into(),
            author: None,
            description: None,
            fields: Vec::new(),
            holidays: Vec::new(),
            dead_days: Vec::new(),
            parties: PartyConfig::default(),
            trigger_date_rules: TriggerDateRules::default(),
            deadlines: Vec::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: DeadlineDefinition) -> Self {
        self.deadlines.push(deadline);
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_holiday(mut self, holiday: CalendarDay) -> Self {
        self.holidays.push(holiday);
        self
    }

    pub fn deadline(&self, id: &str) -> Option<&DeadlineDefinition> {
        self.deadlines.iter().find(|d| d.id == id)
    }

    /// Structural invariants for safe processing.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("template id must be non-empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for deadline in &self.deadlines {
            if !deadline.id.starts_with(DEADLINE_PREFIX) {
                return Err(format!(
                    "deadline id {} must carry the {DEADLINE_PREFIX} prefix",
                    deadline.id
                ));
            }
            if !seen.insert(deadline.id.as_str()) {
                return Err(format!("duplicate deadline id {}", deadline.id));
            }
            let target = deadline.dependency.target_id.as_str();
            if target != TRIGGER_ID
                && !target.starts_with(DEADLINE_PREFIX)
                && !target.starts_with(FIELD_PREFIX)
            {
                return Err(format!(
                    "deadline {} has a malformed dependency target {target}",
                    deadline.id
                ));
            }
        }
        let mut role_ids = std::collections::HashSet::new();
        for role in &self.parties.roles {
            if !role_ids.insert(role.id.as_str()) {
                return Err(format!("duplicate party role id {}", role.id));
            }
            if let Some(max) = role.member_count.maximum {
                if max < role.member_count.minimum {
                    return Err(format!(
                        "role {} has maximum below minimum member count",
                        role.id
                    ));
                }
            }
        }
        Ok(())
    }
}
