//! Generation: turn a template plus case inputs into a dated `Output`.
//!
//! Definitions are processed in dependency order (stable among independent
//! definitions, so equal inputs always produce identical outputs). Each
//! definition expands to one instance, or to one per applicable party member
//! when it carries a multiplicity. A definition whose activation conditions
//! fail, or whose base has no date, becomes an inactive instance with a
//! recorded reason rather than disappearing.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashSet;

use crate::calendar::validate_date;
use crate::conditions::{build_context, evaluate_all, Condition, OperatorRegistry};
use crate::error::EngineError;
use crate::offset::{compute_offset_date, resolve_offset};
use crate::output::{DeadlineInstance, DeadlineStatus, Output, PartyContext};
use crate::party::{
    applicable_members, interpolate_party_template, PartyMap, PartyMember, Representing,
};
use crate::resolver::{is_deadline_ref, is_field_ref, resolve_target_date, ResolvedDates};
use crate::template::{DeadlineDefinition, DeadlineKind, PartyConfig, Template};

/// Case-specific inputs for one generation pass. `now` is supplied by the
/// caller so outputs are reproducible.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub trigger_date: NaiveDate,
    pub field_values: serde_json::Map<String, Value>,
    pub parties: PartyMap,
    pub representing: Option<Representing>,
    pub now: DateTime<Utc>,
}

impl GenerateRequest {
    pub fn new(trigger_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            trigger_date,
            field_values: serde_json::Map::new(),
            parties: PartyMap::new(),
            representing: None,
            now,
        }
    }

    pub fn with_field(mut self, id: impl Into<String>, value: Value) -> Self {
        self.field_values.insert(id.into(), value);
        self
    }

    pub fn with_parties(mut self, parties: PartyMap) -> Self {
        self.parties = parties;
        self
    }

    pub fn with_representing(mut self, representing: Representing) -> Self {
        self.representing = Some(representing);
        self
    }
}

/// The deadline engine: an operator registry plus the generation and
/// recomputation machinery. Cheap to clone; stateless between calls.
#[derive(Debug, Clone, Default)]
pub struct DeadlineEngine {
    registry: OperatorRegistry,
}

impl DeadlineEngine {
    /// Engine with the built-in operator set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: OperatorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OperatorRegistry {
        &mut self.registry
    }

    pub fn generate(
        &self,
        template: &Template,
        request: GenerateRequest,
    ) -> Result<Output, EngineError> {
        template.validate().map_err(EngineError::InvalidTemplate)?;
        validate_date(
            request.trigger_date,
            template.trigger_date_rules.day_rules(),
            &template.holidays,
            &template.dead_days,
        )
        .map_err(EngineError::InvalidTriggerDate)?;

        let mut field_values = request.field_values;
        for field in &template.fields {
            if let Some(default) = &field.default_value {
                field_values
                    .entry(field.id.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        let missing: Vec<String> = template
            .fields
            .iter()
            .filter(|f| f.required && field_values.get(&f.id).is_none_or(Value::is_null))
            .map(|f| f.id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::MissingRequiredField(missing));
        }

        validate_parties(
            &template.parties,
            &request.parties,
            request.representing.as_ref(),
        )?;

        let order = sort_by_dependency(&template.deadlines)?;
        tracing::debug!(
            template = %template.id,
            deadlines = order.len(),
            trigger = %request.trigger_date,
            "generating output"
        );

        let mut deadlines: Vec<DeadlineInstance> = Vec::new();
        let mut resolved = ResolvedDates::new();

        for def in order {
            if def.kind == DeadlineKind::Unknown {
                return Err(EngineError::UnknownDeadlineType(def.id.clone()));
            }
            let expansions: Vec<Option<&PartyMember>> =
                match (&def.multiplicity, template.parties.enabled) {
                    (Some(multiplicity), true) => applicable_members(
                        &request.parties,
                        &template.parties,
                        multiplicity,
                        request.representing.as_ref(),
                    )
                    .into_iter()
                    .map(Some)
                    .collect(),
                    _ => vec![None],
                };
            if expansions.is_empty() {
                let (id, name, description, party) = instance_parts(def, None);
                deadlines.push(skipped_instance(
                    id,
                    def,
                    name,
                    description,
                    party,
                    "no applicable parties".to_string(),
                ));
                continue;
            }

            for member in expansions {
                let (id, name, description, party) = instance_parts(def, member);
                let computed = compute_date_for(
                    def,
                    member,
                    template,
                    &field_values,
                    &request.parties,
                    &deadlines,
                    &resolved,
                    request.trigger_date,
                    request.now,
                    &self.registry,
                )?;
                match computed {
                    ComputedDate::Active {
                        date,
                        resolved_target,
                    } => {
                        resolved.insert(id.clone(), date);
                        // First expansion also answers for the bare
                        // definition id in later lookups.
                        resolved.entry(def.id.clone()).or_insert(date);
                        let status = if date < request.trigger_date {
                            DeadlineStatus::Overdue
                        } else {
                            DeadlineStatus::Pending
                        };
                        deadlines.push(DeadlineInstance {
                            id,
                            definition_id: def.id.clone(),
                            name,
                            description,
                            date: Some(date),
                            status,
                            active: true,
                            skipped_reason: None,
                            resolved_target: Some(resolved_target),
                            party,
                        });
                    }
                    ComputedDate::Skipped { reason } => {
                        tracing::debug!(deadline = %id, %reason, "deadline inactive");
                        deadlines.push(skipped_instance(
                            id,
                            def,
                            name,
                            description,
                            party,
                            reason,
                        ));
                    }
                }
            }
        }

        Ok(Output {
            trigger_date: request.trigger_date,
            deadlines,
            field_values,
            parties: request.parties,
            representing: request.representing,
            adjournments: Vec::new(),
            sub_processes: Vec::new(),
            warnings: Vec::new(),
            generated_at: request.now,
            template_id: template.id.clone(),
            template_version: template.version.clone(),
        })
    }
}

fn validate_parties(
    config: &PartyConfig,
    parties: &PartyMap,
    representing: Option<&Representing>,
) -> Result<(), EngineError> {
    if !config.enabled {
        return Ok(());
    }
    for role in &config.roles {
        let actual = parties.get(&role.id).map_or(0, Vec::len);
        let over = role.member_count.maximum.is_some_and(|max| actual > max);
        if actual < role.member_count.minimum || over {
            return Err(EngineError::PartyCountOutOfBounds {
                role: role.id.clone(),
                minimum: role.member_count.minimum,
                maximum: role.member_count.maximum,
                actual,
            });
        }
    }
    if config.representation_required && representing.is_none() {
        return Err(EngineError::RepresentationRequired);
    }
    Ok(())
}

fn condition_refs(conditions: &[Condition]) -> impl Iterator<Item = &str> {
    conditions.iter().filter_map(|c| match c {
        Condition::DeadlineCompleted { deadline_id }
        | Condition::DeadlineStatus { deadline_id, .. } => Some(deadline_id.as_str()),
        _ => None,
    })
}

/// Every deadline id that must be processed before this definition: date
/// dependencies plus any deadline the activation or override conditions read.
pub(crate) fn ordering_refs(def: &DeadlineDefinition) -> Vec<&str> {
    let mut refs = def.referenced_deadline_ids();
    refs.extend(condition_refs(&def.conditions));
    for rule in &def.dependency.conditions {
        refs.extend(condition_refs(&rule.conditions));
    }
    if let Some(conditional) = &def.offset.conditional {
        for rule in &conditional.rules {
            refs.extend(condition_refs(&rule.conditions));
        }
    }
    refs.sort_unstable();
    refs.dedup();
    refs
}

/// Stable topological sort: repeated passes in template order, placing every
/// definition whose in-template references are already placed. A pass that
/// places nothing means a cycle.
pub(crate) fn sort_by_dependency(
    deadlines: &[DeadlineDefinition],
) -> Result<Vec<&DeadlineDefinition>, EngineError> {
    let ids: HashSet<&str> = deadlines.iter().map(|d| d.id.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::with_capacity(deadlines.len());
    let mut out: Vec<&DeadlineDefinition> = Vec::with_capacity(deadlines.len());
    let mut remaining: Vec<&DeadlineDefinition> = deadlines.iter().collect();

    while !remaining.is_empty() {
        let mut next = Vec::new();
        let mut progressed = false;
        for def in remaining {
            let ready = ordering_refs(def)
                .iter()
                .all(|r| !ids.contains(r) || placed.contains(r));
            if ready {
                placed.insert(def.id.as_str());
                out.push(def);
                progressed = true;
            } else {
                next.push(def);
            }
        }
        if !progressed {
            return Err(EngineError::DependencyCycle(
                next.iter().map(|d| d.id.clone()).collect(),
            ));
        }
        remaining = next;
    }
    Ok(out)
}

pub(crate) enum ComputedDate {
    Active {
        date: NaiveDate,
        resolved_target: String,
    },
    Skipped {
        reason: String,
    },
}

/// Compute one instance's date against the current state. Shared between
/// initial generation and post-action recomputation.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_date_for(
    def: &DeadlineDefinition,
    member: Option<&PartyMember>,
    template: &Template,
    field_values: &serde_json::Map<String, Value>,
    parties: &PartyMap,
    deadlines: &[DeadlineInstance],
    resolved: &ResolvedDates,
    trigger_date: NaiveDate,
    now: DateTime<Utc>,
    registry: &OperatorRegistry,
) -> Result<ComputedDate, EngineError> {
    let ctx = build_context(
        field_values,
        parties,
        deadlines,
        trigger_date,
        now,
        &def.id,
        member,
    );

    if !def.conditions.is_empty() && !evaluate_all(&def.conditions, &ctx, registry) {
        return Ok(ComputedDate::Skipped {
            reason: "activation conditions not met".to_string(),
        });
    }

    for gate in &def.dependencies {
        let prefix = format!("{gate}_");
        let satisfied =
            resolved.contains_key(gate) || resolved.keys().any(|k| k.starts_with(&prefix));
        if !satisfied {
            return Ok(ComputedDate::Skipped {
                reason: format!("waiting on {gate}"),
            });
        }
    }

    let mut target = def.dependency.target_id.as_str();
    for rule in &def.dependency.conditions {
        if rule.enabled && evaluate_all(&rule.conditions, &ctx, registry) {
            target = rule.target_id.as_str();
            break;
        }
    }
    let offset = resolve_offset(&def.offset, &ctx, registry);
    if let Some(redirect) = offset.target_override {
        target = redirect;
    }

    let member_id = member.map(|m| m.id.as_str());
    let base = match resolve_target_date(target, trigger_date, resolved, field_values, member_id) {
        Ok(base) => base,
        Err(EngineError::UnresolvedReference(missing))
            if reference_is_declared(template, &missing) =>
        {
            return Ok(ComputedDate::Skipped {
                reason: format!("{missing} has no date"),
            });
        }
        Err(err) => return Err(err),
    };

    let date = compute_offset_date(
        base,
        offset.days,
        def.offset.date_rules,
        def.offset.counting_rules,
        &template.holidays,
        &template.dead_days,
    )?;
    Ok(ComputedDate::Active {
        date,
        resolved_target: target.to_string(),
    })
}

/// A reference the template declares but which has no value yet is a skip,
/// not an error.
fn reference_is_declared(template: &Template, target: &str) -> bool {
    (is_deadline_ref(target) && template.deadline(target).is_some())
        || (is_field_ref(target) && template.fields.iter().any(|f| f.id == target))
}

pub(crate) fn instance_parts(
    def: &DeadlineDefinition,
    member: Option<&PartyMember>,
) -> (String, String, Option<String>, Option<PartyContext>) {
    match member {
        Some(member) => (
            format!("{}_{}", def.id, member.id),
            interpolate_party_template(def.name_template.as_deref(), member, &def.name),
            def.description_template
                .as_deref()
                .map(|t| interpolate_party_template(Some(t), member, ""))
                .or_else(|| def.description.clone()),
            Some(PartyContext {
                member_id: member.id.clone(),
                member_name: member.name.clone(),
                role_id: member.role_id.clone(),
                kind: member.kind.clone(),
            }),
        ),
        None => (
            def.id.clone(),
            def.name.clone(),
            def.description.clone(),
            None,
        ),
    }
}

fn skipped_instance(
    id: String,
    def: &DeadlineDefinition,
    name: String,
    description: Option<String>,
    party: Option<PartyContext>,
    reason: String,
) -> DeadlineInstance {
    DeadlineInstance {
        id,
        definition_id: def.id.clone(),
        name,
        description,
        date: None,
        status: DeadlineStatus::Pending,
        active: false,
        skipped_reason: Some(reason),
        resolved_target: None,
        party,
    }
}
