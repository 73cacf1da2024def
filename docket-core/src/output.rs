//! Output wire types: what one generation or action application hands back.
//!
//! An `Output` is the unit of persistence-adjacent state. The engine never
//! mutates a caller-held output; actions return a fresh value.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::party::{PartyMap, Representing};
use crate::template::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlineStatus {
    Pending,
    Fulfilled,
    Overdue,
}

/// The party member a fanned-out instance belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyContext {
    pub member_id: String,
    pub member_name: String,
    pub role_id: String,
    /// Party classification of the member ("individual", "company", ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A resolved obligation. `date` is `None` for inactive instances;
/// `skipped_reason` says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineInstance {
    /// Unique within the output; party-expanded ids are
    /// `{definition_id}_{member_id}`.
    pub id: String,
    pub definition_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub status: DeadlineStatus,
    pub active: bool,
    #[serde(default)]
    pub skipped_reason: Option<String>,
    /// The dependency target actually used, post conditional overrides.
    #[serde(default)]
    pub resolved_target: Option<String>,
    #[serde(default)]
    pub party: Option<PartyContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjournment {
    pub id: String,
    pub target_id: String,
    pub from: Option<NaiveDate>,
    pub to: NaiveDate,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A nested template-and-output pair spawned from a parent deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubProcess {
    pub id: String,
    pub name: String,
    pub template: Template,
    pub output: Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub trigger_date: NaiveDate,
    pub deadlines: Vec<DeadlineInstance>,
    pub field_values: serde_json::Map<String, serde_json::Value>,
    /// Party data the output was generated with, kept so later actions are
    /// self-contained.
    #[serde(default)]
    pub parties: PartyMap,
    #[serde(default)]
    pub representing: Option<Representing>,
    pub adjournments: Vec<Adjournment>,
    pub sub_processes: Vec<SubProcess>,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub template_id: String,
    pub template_version: String,
}

impl Output {
    pub fn deadline(&self, id: &str) -> Option<&DeadlineInstance> {
        self.deadlines.iter().find(|d| d.id == id)
    }

    pub fn deadline_mut(&mut self, id: &str) -> Option<&mut DeadlineInstance> {
        self.deadlines.iter_mut().find(|d| d.id == id)
    }

    /// All instances expanded from one definition (one for singular
    /// deadlines, one per party member for fanned-out ones).
    pub fn instances_of<'a>(
        &'a self,
        definition_id: &'a str,
    ) -> impl Iterator<Item = &'a DeadlineInstance> {
        self.deadlines
            .iter()
            .filter(move |d| d.definition_id == definition_id)
    }

    pub fn party_member(&self, member_id: &str) -> Option<&crate::party::PartyMember> {
        self.parties
            .values()
            .flatten()
            .find(|m| m.id == member_id)
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for deadline in &self.deadlines {
            if !seen.insert(deadline.id.as_str()) {
                return Err(format!("duplicate deadline instance id {}", deadline.id));
            }
            if deadline.active && deadline.date.is_none() {
                return Err(format!(
                    "active deadline {} is missing its date",
                    deadline.id
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Output {
        Output {
            trigger_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            deadlines: vec![DeadlineInstance {
                id: "d_notice".to_string(),
                definition_id: "d_notice".to_string(),
                name: "File notice".to_string(),
                description: None,
                date: NaiveDate::from_ymd_opt(2024, 1, 15),
                status: DeadlineStatus::Pending,
                active: true,
                skipped_reason: None,
                resolved_target: Some("_trigger_".to_string()),
                party: None,
            }],
            field_values: serde_json::Map::new(),
            parties: PartyMap::new(),
            representing: None,
            adjournments: vec![],
            sub_processes: vec![],
            warnings: vec![],
            generated_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            template_id: "tpl_appeal".to_string(),
            template_version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn output_json_roundtrip_is_stable() {
        let output = sample();
        output.validate().unwrap();

        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"trigger_date\":\"2024-01-01\""));
        assert!(json.contains("\"status\":\"pending\""));

        let back: Output = serde_json::from_str(&json).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn validate_rejects_duplicate_instance_ids() {
        let mut output = sample();
        let dup = output.deadlines[0].clone();
        output.deadlines.push(dup);
        assert!(output.validate().is_err());
    }

    #[test]
    fn validate_rejects_active_without_date() {
        let mut output = sample();
        output.deadlines[0].date = None;
        assert!(output.validate().is_err());
    }
}
