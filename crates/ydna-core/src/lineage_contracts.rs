use crate::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_LINK_SOURCE: &str = "geni";
pub const IMPORTED_SOURCE: &str = "imported";
pub const PROPAGATED_SOURCE_PREFIX: &str = "propagated_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkConfidence {
    #[default]
    Confirmed,
    Inferred,
}

impl LinkConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkConfidence::Confirmed => "confirmed",
            LinkConfidence::Inferred => "inferred",
        }
    }
}

impl FromStr for LinkConfidence {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "confirmed" => Ok(LinkConfidence::Confirmed),
            "inferred" => Ok(LinkConfidence::Inferred),
            other => Err(ContractError::UnknownValue {
                kind: "link confidence",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentConfidence {
    Confirmed,
    High,
    Propagated,
}

impl AssignmentConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentConfidence::Confirmed => "confirmed",
            AssignmentConfidence::High => "high",
            AssignmentConfidence::Propagated => "propagated",
        }
    }
}

impl fmt::Display for AssignmentConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentConfidence {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "confirmed" => Ok(AssignmentConfidence::Confirmed),
            "high" => Ok(AssignmentConfidence::High),
            "propagated" => Ok(AssignmentConfidence::Propagated),
            other => Err(ContractError::UnknownValue {
                kind: "assignment confidence",
                value: other.to_string(),
            }),
        }
    }
}

/// Directed father -> child edge. At most one row per (father, child).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaternalLink {
    pub father_id: String,
    pub child_id: String,
    pub source: String,
    pub confidence: LinkConfidence,
    pub created_at: DateTime<Utc>,
}

/// One haplogroup label record. Records are only ever inserted; the current
/// label of a profile is the most-tested, then most-recent record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HaplogroupAssignment {
    pub profile_id: String,
    pub haplogroup: String,
    pub source: String,
    #[serde(default)]
    pub source_detail: Option<String>,
    pub is_tested: bool,
    pub is_propagated: bool,
    #[serde(default)]
    pub propagated_from: Option<String>,
    pub confidence: AssignmentConfidence,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HaplogroupAssignment {
    /// A directly measured result, e.g. from a lab report or an import.
    pub fn tested(
        profile_id: impl Into<String>,
        haplogroup: impl Into<String>,
        source: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            haplogroup: haplogroup.into(),
            source: source.into(),
            source_detail: None,
            is_tested: true,
            is_propagated: false,
            propagated_from: None,
            confidence: AssignmentConfidence::Confirmed,
            notes: None,
            created_at,
        }
    }
}

pub fn propagated_source(source: &str) -> String {
    format!("{PROPAGATED_SOURCE_PREFIX}{source}")
}

pub fn is_propagated_source(source: &str) -> bool {
    source.contains("propagated")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl FromStr for Direction {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(ContractError::UnknownValue {
                kind: "direction",
                value: other.to_string(),
            }),
        }
    }
}

/// Where in a run a conflicting label was met.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum ConflictContext {
    Root,
    Ancestor { generation: u32 },
    Descendant { generation: u32 },
}

impl ConflictContext {
    pub fn along(direction: Direction, generation: u32) -> Self {
        match direction {
            Direction::Up => ConflictContext::Ancestor { generation },
            Direction::Down => ConflictContext::Descendant { generation },
        }
    }
}

impl fmt::Display for ConflictContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictContext::Root => f.write_str("root"),
            ConflictContext::Ancestor { generation } => write!(f, "up, generation {generation}"),
            ConflictContext::Descendant { generation } => {
                write!(f, "down, generation {generation}")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelConflict {
    pub profile_id: String,
    pub existing: String,
    pub proposed: String,
    pub context: ConflictContext,
}

/// A paternal descendant reached from a traversal root. `path` starts with the
/// root identifier and ends with this profile's identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Descendant {
    pub profile: Profile,
    pub generation: u32,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropagationStats {
    pub source_profile: String,
    pub haplogroup: String,
    pub ancestors_propagated: usize,
    pub descendants_propagated: usize,
    pub conflicts: Vec<LabelConflict>,
    pub fetch_failures: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FullTreeStats {
    pub haplogroup: String,
    pub root_profile_id: String,
    pub total_propagated: usize,
    pub skipped_explored: usize,
    /// Depth below the root of the deepest labelled descendant. The root
    /// itself is generation 0, so a root without sons reports 0 and a root
    /// with one labelled son reports 1. Counts that number the root as
    /// generation 1 are one higher.
    pub generations: u32,
    pub conflicts: Vec<LabelConflict>,
    pub resumed: bool,
    pub fetch_failures: usize,
}

/// Bookkeeping record for one completed tree build. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineageTree {
    pub tree_id: i64,
    pub name: String,
    pub root_profile_id: String,
    pub haplogroup: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeMember {
    pub tree_id: i64,
    pub profile_id: String,
    pub generations_from_root: u32,
    pub direction: Option<Direction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagated_source_is_recognised() {
        let source = propagated_source("FTDNA");
        assert_eq!(source, "propagated_FTDNA");
        assert!(is_propagated_source(&source));
        assert!(!is_propagated_source("YFull"));
    }

    #[test]
    fn enum_strings_roundtrip_through_from_str() {
        for confidence in [
            AssignmentConfidence::Confirmed,
            AssignmentConfidence::High,
            AssignmentConfidence::Propagated,
        ] {
            assert_eq!(confidence.as_str().parse(), Ok(confidence));
        }
        assert_eq!("inferred".parse(), Ok(LinkConfidence::Inferred));
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn conflict_context_serializes_with_tag() {
        let json = serde_json::to_value(ConflictContext::Descendant { generation: 3 })
            .expect("serialize");
        assert_eq!(json["at"], "descendant");
        assert_eq!(json["generation"], 3);
        assert_eq!(
            ConflictContext::along(Direction::Up, 2),
            ConflictContext::Ancestor { generation: 2 }
        );
    }
}
