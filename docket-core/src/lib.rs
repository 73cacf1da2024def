//! docket-core: deterministic deadline computation for legal process templates

pub mod actions;
pub mod calendar;
pub mod conditions;
pub mod error;
pub mod generate;
pub mod offset;
pub mod output;
pub mod party;
pub mod reminders;
pub mod resolver;
pub mod template;
pub mod timezone;

pub use actions::Action;
pub use calendar::{validate_date, DateInvalidReason, DayRules};
pub use conditions::{
    build_context, evaluate_all, evaluate_condition, Condition, EvalContext, OperatorRegistry,
};
pub use error::EngineError;
pub use generate::{DeadlineEngine, GenerateRequest};
pub use offset::{compute_offset_date, resolve_offset, ResolvedOffset, MAX_WALK_DAYS};
pub use output::{
    Adjournment, DeadlineInstance, DeadlineStatus, Output, PartyContext, SubProcess,
};
pub use party::{
    applicable_members, interpolate_party_template, ContactInfo, PartyMap, PartyMember,
    Representing,
};
pub use reminders::{project_reminders, ReminderIntent, ReminderProjection, ReminderSettings};
pub use resolver::{resolve_target_date, ResolvedDates, DEADLINE_PREFIX, FIELD_PREFIX, TRIGGER_ID};
pub use template::{
    Applications, CalendarDay, DeadlineDefinition, DeadlineKind, Dependency, Field, FieldType,
    Multiplicity, MultiplicityKind, Offset, PartyConfig, PartyRole, ReminderChannel,
    ReminderDefinition, ReminderPriority, Side, Template, TriggerDateRules,
};
pub use timezone::{localize_to_utc, parse_time_of_day, parse_zone, Localized};
