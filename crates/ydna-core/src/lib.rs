use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub mod lineage_contracts;

pub use lineage_contracts::{
    is_propagated_source, propagated_source, AssignmentConfidence, ConflictContext,
    ContractError, Descendant, Direction, FullTreeStats, HaplogroupAssignment, LabelConflict,
    LinkConfidence, LineageTree, PaternalLink, PropagationStats, TreeMember,
    DEFAULT_LINK_SOURCE, IMPORTED_SOURCE,
};

pub const PROFILE_ID_PREFIX: &str = "profile-";
pub const UNION_ID_PREFIX: &str = "union-";
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }

    pub fn is_male(&self) -> bool {
        matches!(self, Gender::Male)
    }

    /// Lenient parse used for remote payloads and stored rows: anything that is
    /// not recognisably male or female is `Unknown`.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Gender::Unknown)
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "unknown" | "" => Ok(Gender::Unknown),
            other => Err(format!("Unknown gender: {other}")),
        }
    }
}

/// Free-text summary of a birth, death or marriage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VitalEvent {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
}

impl VitalEvent {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.place.is_none()
    }
}

/// One individual as known to the directory. Identity is `id`; every other
/// field is last-write-wins when the profile is saved again.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub maiden_name: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub birth: VitalEvent,
    #[serde(default)]
    pub death: VitalEvent,
    #[serde(default)]
    pub is_alive: bool,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub about_me: Option<String>,
    #[serde(default)]
    pub raw: Value,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(id: impl Into<String>, gender: Gender) -> Self {
        Self {
            id: id.into(),
            gender,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, first: &str, last: &str) -> Self {
        self.first_name = Some(first.to_string());
        self.last_name = Some(last.to_string());
        self
    }

    pub fn is_male(&self) -> bool {
        self.gender.is_male()
    }

    /// Display name, falling back to "first last" and finally "Unknown".
    pub fn name(&self) -> String {
        if let Some(display) = non_empty(self.display_name.as_deref()) {
            return display.to_string();
        }
        let parts = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .filter_map(non_empty)
            .collect::<Vec<_>>();
        if parts.is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// A union node from the family graph: partners and children joined by a
/// marriage or partnership.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FamilyUnion {
    pub id: String,
    #[serde(default)]
    pub partners: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub marriage: VitalEvent,
    #[serde(default)]
    pub divorce_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub raw: Value,
}

/// Decoded immediate-family response. Identifiers are the directory's
/// canonical ones and may differ from the identifier that was requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImmediateFamily {
    pub focus: Option<Profile>,
    pub parents: Vec<Profile>,
    pub children: Vec<Profile>,
    pub partners: Vec<Profile>,
    pub profiles: Vec<Profile>,
    pub unions: Vec<FamilyUnion>,
}

impl ImmediateFamily {
    pub fn focus_id(&self) -> Option<&str> {
        self.focus.as_ref().map(|focus| focus.id.as_str())
    }

    /// First male parent in directory order.
    pub fn father(&self) -> Option<&Profile> {
        self.parents.iter().find(|parent| parent.is_male())
    }

    pub fn sons(&self) -> impl Iterator<Item = &Profile> {
        self.children.iter().filter(|child| child.is_male())
    }
}

/// Normalizes user-supplied identifiers: `profile-<n>` is kept, a URL is
/// reduced to its last path segment, anything else gets the `profile-` prefix.
pub fn normalize_profile_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with(PROFILE_ID_PREFIX) {
        return trimmed.to_string();
    }
    if trimmed.contains('/') {
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        if last.starts_with(PROFILE_ID_PREFIX) {
            return last.to_string();
        }
        return format!("{PROFILE_ID_PREFIX}{last}");
    }
    format!("{PROFILE_ID_PREFIX}{trimmed}")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_prefers_display_name_then_first_last() {
        let mut profile = Profile::new("profile-1", Gender::Male).with_name("John", "Smith");
        assert_eq!(profile.name(), "John Smith");

        profile.display_name = Some("John A. Smith".to_string());
        assert_eq!(profile.name(), "John A. Smith");

        let anonymous = Profile::new("profile-2", Gender::Unknown);
        assert_eq!(anonymous.name(), "Unknown");
    }

    #[test]
    fn gender_parse_is_lenient() {
        assert_eq!(Gender::parse_lenient(Some("Male")), Gender::Male);
        assert_eq!(Gender::parse_lenient(Some("female")), Gender::Female);
        assert_eq!(Gender::parse_lenient(Some("other")), Gender::Unknown);
        assert_eq!(Gender::parse_lenient(None), Gender::Unknown);
    }

    #[test]
    fn normalize_profile_id_handles_known_shapes() {
        assert_eq!(normalize_profile_id("profile-15611"), "profile-15611");
        assert_eq!(normalize_profile_id("15611"), "profile-15611");
        assert_eq!(
            normalize_profile_id("https://www.geni.com/api/profile-42"),
            "profile-42"
        );
        assert_eq!(
            normalize_profile_id("https://www.geni.com/people/John-Smith/6000000012345678901/"),
            "profile-6000000012345678901"
        );
    }

    #[test]
    fn family_father_is_first_male_parent() {
        let family = ImmediateFamily {
            focus: Some(Profile::new("profile-3", Gender::Male)),
            parents: vec![
                Profile::new("profile-1", Gender::Female),
                Profile::new("profile-2", Gender::Male),
                Profile::new("profile-9", Gender::Male),
            ],
            children: vec![
                Profile::new("profile-4", Gender::Male),
                Profile::new("profile-5", Gender::Female),
            ],
            ..ImmediateFamily::default()
        };

        assert_eq!(family.focus_id(), Some("profile-3"));
        assert_eq!(family.father().map(|p| p.id.as_str()), Some("profile-2"));
        assert_eq!(
            family.sons().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["profile-4"]
        );
    }
}
