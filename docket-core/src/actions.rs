//! Actions: lifecycle mutations applied to an existing output.
//!
//! An action targets a deadline by instance id or by definition id (which
//! addresses every fanned-out instance at once). Applying one never mutates
//! the caller's output; a new output comes back. After a date-changing or
//! status-changing action the engine recomputes the dynamic deadlines that
//! transitively depend on the target; static deadlines keep their dates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::calendar::validate_date;
use crate::conditions::{build_context, evaluate_all};
use crate::error::EngineError;
use crate::generate::{
    compute_date_for, ordering_refs, sort_by_dependency, ComputedDate, DeadlineEngine,
    GenerateRequest,
};
use crate::output::{Adjournment, DeadlineStatus, Output, SubProcess};
use crate::resolver::ResolvedDates;
use crate::template::{DeadlineDefinition, Template};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "meta", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Mark the target as done, optionally recording the date it actually
    /// happened. Dynamic dependents get recomputed.
    Fulfill {
        target_id: String,
        #[serde(default)]
        fulfilled_date: Option<NaiveDate>,
    },
    /// Recompute the target's date from its definition, optionally merging
    /// new field values or a corrected trigger date first.
    Recalculate {
        target_id: String,
        #[serde(default)]
        field_values: Option<serde_json::Map<String, serde_json::Value>>,
        #[serde(default)]
        trigger_date: Option<NaiveDate>,
    },
    /// Move the target to a new date, keeping an audit record of the move.
    /// `force` accepts a date the definition's rules would reject.
    Adjourn {
        target_id: String,
        new_date: NaiveDate,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Start a nested process anchored on the target's current date.
    Spawn {
        target_id: String,
        template: Template,
        #[serde(default)]
        name: Option<String>,
    },
    /// Anything unrecognized deserializes here and is rejected on apply.
    Null,
}

// The adjacently-tagged derive cannot route an unknown tag with a non-empty
// `meta` map into the unit `Null` variant, so deserialization dispatches the
// tag by hand: known tags parse their `meta`, everything else becomes `Null`
// with `meta` ignored. Serialization stays on the derive above.
impl<'de> Deserialize<'de> for Action {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        struct Wire {
            action: String,
            #[serde(default)]
            meta: serde_json::Value,
        }

        #[derive(Deserialize)]
        struct FulfillMeta {
            target_id: String,
            #[serde(default)]
            fulfilled_date: Option<NaiveDate>,
        }

        #[derive(Deserialize)]
        struct RecalculateMeta {
            target_id: String,
            #[serde(default)]
            field_values: Option<serde_json::Map<String, serde_json::Value>>,
            #[serde(default)]
            trigger_date: Option<NaiveDate>,
        }

        #[derive(Deserialize)]
        struct AdjournMeta {
            target_id: String,
            new_date: NaiveDate,
            #[serde(default)]
            force: bool,
            #[serde(default)]
            reason: Option<String>,
        }

        #[derive(Deserialize)]
        struct SpawnMeta {
            target_id: String,
            template: Template,
            #[serde(default)]
            name: Option<String>,
        }

        let wire = Wire::deserialize(deserializer)?;
        match wire.action.as_str() {
            "FULFILL" => {
                let meta: FulfillMeta =
                    serde_json::from_value(wire.meta).map_err(D::Error::custom)?;
                Ok(Action::Fulfill {
                    target_id: meta.target_id,
                    fulfilled_date: meta.fulfilled_date,
                })
            }
            "RECALCULATE" => {
                let meta: RecalculateMeta =
                    serde_json::from_value(wire.meta).map_err(D::Error::custom)?;
                Ok(Action::Recalculate {
                    target_id: meta.target_id,
                    field_values: meta.field_values,
                    trigger_date: meta.trigger_date,
                })
            }
            "ADJOURN" => {
                let meta: AdjournMeta =
                    serde_json::from_value(wire.meta).map_err(D::Error::custom)?;
                Ok(Action::Adjourn {
                    target_id: meta.target_id,
                    new_date: meta.new_date,
                    force: meta.force,
                    reason: meta.reason,
                })
            }
            "SPAWN" => {
                let meta: SpawnMeta =
                    serde_json::from_value(wire.meta).map_err(D::Error::custom)?;
                Ok(Action::Spawn {
                    target_id: meta.target_id,
                    template: meta.template,
                    name: meta.name,
                })
            }
            _ => Ok(Action::Null),
        }
    }
}

impl DeadlineEngine {
    /// Apply one action against `output`, returning the updated copy.
    pub fn apply_action(
        &self,
        template: &Template,
        output: &Output,
        action: Action,
        now: DateTime<Utc>,
    ) -> Result<Output, EngineError> {
        let mut next = output.clone();
        match action {
            Action::Fulfill {
                target_id,
                fulfilled_date,
            } => {
                let ids = target_instance_ids(&next, &target_id)?;
                tracing::debug!(deadline = %target_id, instances = ids.len(), "fulfilling");
                for id in &ids {
                    if let Some(instance) = next.deadline_mut(id) {
                        instance.status = DeadlineStatus::Fulfilled;
                        if let Some(date) = fulfilled_date {
                            instance.date = Some(date);
                        }
                    }
                }
                let definition_id = definition_of(&next, &ids[0])?;
                self.recalculate_dependents(template, &mut next, &definition_id, now)?;
            }
            // Recomputes the target alone; it is the primitive the cascade
            // itself uses, so it never cascades further.
            Action::Recalculate {
                target_id,
                field_values,
                trigger_date,
            } => {
                if let Some(values) = field_values {
                    for (key, value) in values {
                        next.field_values.insert(key, value);
                    }
                }
                if let Some(trigger) = trigger_date {
                    next.trigger_date = trigger;
                }
                let ids = target_instance_ids(&next, &target_id)?;
                let definition_id = definition_of(&next, &ids[0])?;
                let def = template
                    .deadline(&definition_id)
                    .ok_or_else(|| EngineError::UnresolvedReference(definition_id.clone()))?;
                for id in &ids {
                    let computed = self.recompute_instance(def, template, &next, id, now)?;
                    apply_computed(&mut next, id, computed);
                }
            }
            Action::Adjourn {
                target_id,
                new_date,
                force,
                reason,
            } => {
                let ids = target_instance_ids(&next, &target_id)?;
                let definition_id = definition_of(&next, &ids[0])?;
                let def = template
                    .deadline(&definition_id)
                    .ok_or_else(|| EngineError::UnresolvedReference(definition_id.clone()))?;
                if !force {
                    validate_date(
                        new_date,
                        def.offset.date_rules.day_rules(),
                        &template.holidays,
                        &template.dead_days,
                    )
                    .map_err(|invalid| EngineError::DateNotAllowed {
                        target: target_id.clone(),
                        reason: invalid,
                    })?;
                }

                for id in &ids {
                    let Some(instance) = next.deadline_mut(id) else {
                        continue;
                    };
                    let from = instance.date;
                    instance.date = Some(new_date);
                    instance.active = true;
                    instance.skipped_reason = None;
                    next.adjournments.push(Adjournment {
                        id: format!("adj-{}", next.adjournments.len() + 1),
                        target_id: id.clone(),
                        from,
                        to: new_date,
                        reason: reason.clone(),
                    });
                }
                self.recalculate_dependents(template, &mut next, &definition_id, now)?;
            }
            Action::Spawn {
                target_id,
                template: sub_template,
                name,
            } => {
                let ids = target_instance_ids(&next, &target_id)?;
                let instance_id = ids[0].clone();
                let definition_id = definition_of(&next, &instance_id)?;
                let def = template
                    .deadline(&definition_id)
                    .ok_or_else(|| EngineError::UnresolvedReference(definition_id.clone()))?;

                let applications = def
                    .applications
                    .as_ref()
                    .filter(|a| a.enabled)
                    .ok_or_else(|| EngineError::SpawnNotEnabled(definition_id.clone()))?;
                let ctx = build_context(
                    &next.field_values,
                    &next.parties,
                    &next.deadlines,
                    next.trigger_date,
                    now,
                    &def.id,
                    None,
                );
                if !evaluate_all(&applications.conditions, &ctx, self.registry()) {
                    return Err(EngineError::SpawnConditionUnmet(definition_id));
                }

                let anchor = next
                    .deadline(&instance_id)
                    .and_then(|i| i.date)
                    .ok_or_else(|| EngineError::UnresolvedReference(instance_id.clone()))?;

                let sub_request = GenerateRequest {
                    trigger_date: anchor,
                    field_values: next.field_values.clone(),
                    parties: next.parties.clone(),
                    representing: next.representing.clone(),
                    now,
                };
                let sub_output = self.generate(&sub_template, sub_request)?;

                let sub_name = name
                    .or_else(|| sub_template.name.clone())
                    .unwrap_or_else(|| sub_template.id.clone());
                let sub_id = format!("sp-{}-{}", instance_id, next.sub_processes.len() + 1);
                tracing::debug!(sub_process = %sub_id, anchor = %anchor, "spawned sub-process");
                next.sub_processes.push(SubProcess {
                    id: sub_id,
                    name: sub_name,
                    template: sub_template,
                    output: sub_output,
                });
            }
            Action::Null => return Err(EngineError::UnknownActionKind),
        }
        Ok(next)
    }

    /// Recompute every dynamic deadline transitively downstream of
    /// `changed_definition`. Fulfilled instances keep their dates.
    fn recalculate_dependents(
        &self,
        template: &Template,
        output: &mut Output,
        changed_definition: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut affected: HashSet<&str> = HashSet::new();
        let mut frontier: Vec<&str> = vec![changed_definition];
        while let Some(current) = frontier.pop() {
            for def in &template.deadlines {
                if affected.contains(def.id.as_str()) {
                    continue;
                }
                if ordering_refs(def).contains(&current) {
                    affected.insert(def.id.as_str());
                    frontier.push(def.id.as_str());
                }
            }
        }
        if affected.is_empty() {
            return Ok(());
        }

        let order = sort_by_dependency(&template.deadlines)?;
        for def in order {
            if !def.dynamic || !affected.contains(def.id.as_str()) {
                continue;
            }
            let instance_ids: Vec<String> =
                output.instances_of(&def.id).map(|i| i.id.clone()).collect();
            for id in instance_ids {
                let computed = self.recompute_instance(def, template, output, &id, now)?;
                apply_computed(output, &id, computed);
            }
        }
        Ok(())
    }

    /// Re-run the date computation for one existing instance against the
    /// output's current state. Fulfilled instances are pinned.
    fn recompute_instance(
        &self,
        def: &DeadlineDefinition,
        template: &Template,
        output: &Output,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ComputedDate>, EngineError> {
        let Some(instance) = output.deadline(instance_id) else {
            return Ok(None);
        };
        if instance.status == DeadlineStatus::Fulfilled {
            return Ok(None);
        }
        let member = instance
            .party
            .as_ref()
            .and_then(|p| output.party_member(&p.member_id))
            .cloned();
        let resolved = resolved_dates(output);
        compute_date_for(
            def,
            member.as_ref(),
            template,
            &output.field_values,
            &output.parties,
            &output.deadlines,
            &resolved,
            output.trigger_date,
            now,
            self.registry(),
        )
        .map(Some)
    }
}

fn apply_computed(output: &mut Output, instance_id: &str, computed: Option<ComputedDate>) {
    let Some(computed) = computed else {
        return;
    };
    let trigger = output.trigger_date;
    if let Some(instance) = output.deadline_mut(instance_id) {
        match computed {
            ComputedDate::Active {
                date,
                resolved_target,
            } => {
                instance.date = Some(date);
                instance.active = true;
                instance.skipped_reason = None;
                instance.resolved_target = Some(resolved_target);
                instance.status = if date < trigger {
                    DeadlineStatus::Overdue
                } else {
                    DeadlineStatus::Pending
                };
            }
            ComputedDate::Skipped { reason } => {
                instance.date = None;
                instance.active = false;
                instance.skipped_reason = Some(reason);
                instance.resolved_target = None;
            }
        }
    }
}

/// Resolve an action target to concrete instance ids: an exact instance
/// match wins, otherwise every instance of the named definition.
fn target_instance_ids(output: &Output, target_id: &str) -> Result<Vec<String>, EngineError> {
    if output.deadline(target_id).is_some() {
        return Ok(vec![target_id.to_string()]);
    }
    let ids: Vec<String> = output
        .instances_of(target_id)
        .map(|i| i.id.clone())
        .collect();
    if ids.is_empty() {
        return Err(EngineError::UnresolvedReference(target_id.to_string()));
    }
    Ok(ids)
}

fn definition_of(output: &Output, instance_id: &str) -> Result<String, EngineError> {
    output
        .deadline(instance_id)
        .map(|i| i.definition_id.clone())
        .ok_or_else(|| EngineError::UnresolvedReference(instance_id.to_string()))
}

/// Current date of every instance, plus each definition's first dated
/// instance under the bare definition id.
fn resolved_dates(output: &Output) -> ResolvedDates {
    let mut resolved = ResolvedDates::new();
    for instance in &output.deadlines {
        if let Some(date) = instance.date {
            resolved.insert(instance.id.clone(), date);
            resolved
                .entry(instance.definition_id.clone())
                .or_insert(date);
        }
    }
    resolved
}
