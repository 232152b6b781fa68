//! Entity nodes in the knowledge graph

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Stable slug identifying an entity
///
/// Ids are immutable once created. Merges retarget references to the
/// canonical id rather than renaming nodes in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a NodeId from a string slug
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Entity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Event,
    Document,
    FinancialEntity,
    /// Anything the extractor labelled outside the known set
    #[serde(other)]
    Unknown,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Event => "EVENT",
            Self::Document => "DOCUMENT",
            Self::FinancialEntity => "FINANCIAL_ENTITY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for EntityType {
    type Err = std::convert::Infallible;

    /// Case-insensitive; unrecognised values map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "PERSON" => Self::Person,
            "ORGANIZATION" | "ORGANISATION" => Self::Organization,
            "LOCATION" => Self::Location,
            "EVENT" => Self::Event,
            "DOCUMENT" => Self::Document,
            "FINANCIAL_ENTITY" => Self::FinancialEntity,
            _ => Self::Unknown,
        })
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canvas position, only meaningful to the UI
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Derived node metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    /// Number of edges touching this node, recomputed on load
    #[serde(default)]
    pub degree: usize,
    /// Community assigned by external detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_color: Option<String>,
}

/// An entity in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Display name
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl Node {
    /// Create a node with no description or aliases
    pub fn new(id: impl Into<NodeId>, label: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            entity_type,
            description: String::new(),
            aliases: BTreeSet::new(),
            position: Position::default(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }
}
