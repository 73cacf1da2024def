//! Reminder projection: turn an output's dated deadlines into concrete UTC
//! fire instants.
//!
//! Projection is pure and repeatable. It never schedules anything; the host
//! feeds the intents to whatever notification machinery it runs. Reminders
//! whose instant has already passed relative to `now` are dropped.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::add_days;
use crate::output::{DeadlineStatus, Output};
use crate::template::{ReminderChannel, ReminderPriority, Template};
use crate::timezone::{localize_to_utc, parse_time_of_day, parse_zone};

const FALLBACK_TIME: &str = "09:00";

/// Host scheduling preferences: the zone reminders are expressed in and the
/// wall-clock time used when a reminder does not set its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub timezone: String,
    pub default_time_of_day: String,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            default_time_of_day: FALLBACK_TIME.to_string(),
        }
    }
}

impl ReminderSettings {
    pub fn new(timezone: impl Into<String>) -> Self {
        Self {
            timezone: timezone.into(),
            ..Self::default()
        }
    }
}

/// One reminder to fire: which deadline instance, when (UTC), how urgently,
/// and over which channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderIntent {
    pub id: String,
    pub deadline_id: String,
    pub deadline_name: String,
    pub reminder_id: String,
    pub priority: ReminderPriority,
    pub channels: Vec<ReminderChannel>,
    pub local_date: NaiveDate,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReminderProjection {
    pub intents: Vec<ReminderIntent>,
    pub warnings: Vec<String>,
}

/// Project every reminder of every active, dated deadline instance.
pub fn project_reminders(
    template: &Template,
    output: &Output,
    settings: &ReminderSettings,
    now: DateTime<Utc>,
) -> ReminderProjection {
    let mut projection = ReminderProjection::default();

    let tz = match parse_zone(&settings.timezone) {
        Some(tz) => tz,
        None => {
            projection.warnings.push(format!(
                "unknown timezone {}; reminders projected in UTC",
                settings.timezone
            ));
            chrono_tz::UTC
        }
    };
    let default_time = resolve_time(
        &settings.default_time_of_day,
        default_fallback_time(),
        &mut projection.warnings,
    );

    for instance in &output.deadlines {
        if instance.status == DeadlineStatus::Fulfilled {
            continue;
        }
        let Some(date) = instance.date.filter(|_| instance.active) else {
            continue;
        };
        let Some(def) = template.deadline(&instance.definition_id) else {
            continue;
        };
        for reminder in &def.reminders {
            let time = match &reminder.time_of_day {
                Some(raw) => resolve_time(raw, default_time, &mut projection.warnings),
                None => default_time,
            };
            let local_date = add_days(date, reminder.offset_days);
            let localized = localize_to_utc(local_date, time, tz);
            if let Some(warning) = localized.warning {
                projection
                    .warnings
                    .push(format!("{}: {warning}", instance.id));
            }
            if localized.instant < now {
                continue;
            }
            let channels = if reminder.channels.is_empty() {
                vec![ReminderChannel::Push]
            } else {
                reminder.channels.clone()
            };
            projection.intents.push(ReminderIntent {
                id: format!("{}:{}", instance.id, reminder.id),
                deadline_id: instance.id.clone(),
                deadline_name: instance.name.clone(),
                reminder_id: reminder.id.clone(),
                priority: reminder.priority,
                channels,
                local_date,
                fire_at: localized.instant,
            });
        }
    }

    projection
        .intents
        .sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
    projection
}

fn default_fallback_time() -> NaiveTime {
    // FALLBACK_TIME is well-formed.
    parse_time_of_day(FALLBACK_TIME).unwrap_or_default()
}

fn resolve_time(raw: &str, fallback: NaiveTime, warnings: &mut Vec<String>) -> NaiveTime {
    match parse_time_of_day(raw) {
        Some(time) => time,
        None => {
            warnings.push(format!("unparseable time of day {raw}; using fallback"));
            fallback
        }
    }
}
