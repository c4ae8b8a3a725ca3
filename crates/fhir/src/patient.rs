//! Patient wire model and demographic lookups.
//!
//! Patients are read from remote search results, so parsing is tolerant: unknown keys are
//! ignored and `HumanName.family` is accepted both as a DSTU2 array and as an R4 string.
//!
//! Responsibilities:
//! - Model the demographic fields staged for matching (identifiers, names, gender,
//!   birth date, contact points)
//! - Provide lookups by identifier system, name use and contact-point system/use

use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Wire types
// ============================================================================

/// A `Patient` resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PatientMeta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(rename = "birthDate", default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub telecom: Vec<ContactPoint>,
}

/// Resource metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientMeta {
    #[serde(rename = "versionId", default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(rename = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// A business identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A human name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanName {
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub family: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefix: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suffix: Vec<String>,
}

/// A phone number, email address or other contact detail.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

// ============================================================================
// Lookups
// ============================================================================

impl Patient {
    /// Value of the first identifier whose system matches `system` (case-insensitive).
    pub fn identifier_value(&self, system: &str) -> Option<&str> {
        self.identifier
            .iter()
            .find(|i| {
                i.system
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(system))
            })
            .and_then(|i| i.value.as_deref())
    }

    /// The name with the given use.
    ///
    /// An empty `use_type` selects the first name that carries no `use` at all.
    pub fn name_by_use(&self, use_type: &str) -> Option<&HumanName> {
        self.name.iter().find(|n| match n.use_type.as_deref() {
            Some(u) => !use_type.is_empty() && u.eq_ignore_ascii_case(use_type),
            None => use_type.is_empty(),
        })
    }

    /// The preferred contact point for `system`/`use_type`.
    ///
    /// Candidates are ordered by `rank`; unranked contact points sort ahead of ranked ones,
    /// and ties keep document order.
    pub fn contact_point(&self, system: &str, use_type: &str) -> Option<&ContactPoint> {
        let mut candidates: Vec<&ContactPoint> = self
            .telecom
            .iter()
            .filter(|c| {
                c.system.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(system))
                    && c.use_type
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(use_type))
            })
            .collect();
        candidates.sort_by_key(|c| c.rank.unwrap_or(0));
        candidates.into_iter().next()
    }

    /// The version id recorded in `meta`, if any.
    pub fn version_id(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.version_id.as_deref())
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
