//! Party data and fan-out helpers: member selection and name interpolation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::template::{Multiplicity, PartyConfig, Side, SideFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// One member of a party role (a person or an organisation on the matter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMember {
    pub id: String,
    pub name: String,
    /// Party classification, e.g. "individual" or "company".
    #[serde(rename = "type", default)]
    pub kind: String,
    pub role_id: String,
    #[serde(default)]
    pub contact: Option<ContactInfo>,
}

impl PartyMember {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: String::new(),
            role_id: role_id.into(),
            contact: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

/// Role id → members. Ordered map so outputs serialize deterministically.
pub type PartyMap = BTreeMap<String, Vec<PartyMember>>;

/// Which parties the caller acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representing {
    pub role_id: String,
    pub party_member_ids: Vec<String>,
}

/// Collect the members a multiplicity config expands over: by role id, by
/// side, or all, optionally narrowed to the represented parties.
pub fn applicable_members<'a>(
    parties: &'a PartyMap,
    config: &PartyConfig,
    multiplicity: &Multiplicity,
    representing: Option<&Representing>,
) -> Vec<&'a PartyMember> {
    let mut members: Vec<&PartyMember> = if let Some(role_id) = &multiplicity.role_id {
        parties.get(role_id).into_iter().flatten().collect()
    } else if let Some(side) = multiplicity.side {
        match side {
            SideFilter::All => all_members(parties, config),
            SideFilter::First => side_members(parties, config, Side::First),
            SideFilter::Second => side_members(parties, config, Side::Second),
        }
    } else {
        all_members(parties, config)
    };

    if multiplicity.apply_to_representing {
        if let Some(representing) = representing {
            members.retain(|m| representing.party_member_ids.contains(&m.id));
        }
    }

    members
}

/// All members, walking configured roles in template order so expansion is
/// deterministic; roles absent from the config come last in map order.
fn all_members<'a>(parties: &'a PartyMap, config: &PartyConfig) -> Vec<&'a PartyMember> {
    let mut out: Vec<&PartyMember> = Vec::new();
    for role in &config.roles {
        if let Some(members) = parties.get(&role.id) {
            out.extend(members.iter());
        }
    }
    for (role_id, members) in parties {
        if !config.roles.iter().any(|r| &r.id == role_id) {
            out.extend(members.iter());
        }
    }
    out
}

fn side_members<'a>(
    parties: &'a PartyMap,
    config: &PartyConfig,
    side: Side,
) -> Vec<&'a PartyMember> {
    config
        .roles
        .iter()
        .filter(|role| role.side == side)
        .filter_map(|role| parties.get(&role.id))
        .flatten()
        .collect()
}

/// Substitute `{{party.*}}` placeholders against a member; falls back to the
/// plain name when no template is configured.
pub fn interpolate_party_template(
    template: Option<&str>,
    member: &PartyMember,
    fallback: &str,
) -> String {
    let Some(template) = template else {
        return fallback.to_string();
    };
    let contact = member.contact.as_ref();
    let email = contact
        .and_then(|c| c.email.as_deref())
        .unwrap_or("N/A");
    let phone = contact
        .and_then(|c| c.phone.as_deref())
        .unwrap_or("N/A");
    template
        .replace("{{party.name}}", &member.name)
        .replace("{{party.type}}", &member.kind)
        .replace("{{party.role}}", &member.role_id)
        .replace("{{party.email}}", email)
        .replace("{{party.phone}}", phone)
}
