//! Evidenced relationships between entities

use super::node::NodeId;
use serde::{Deserialize, Serialize};

/// Identifier for an edge, derived from subject/predicate/object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic id for a triple: `e-{subject}-{predicate}-{object}`
    pub fn derive(source: &NodeId, predicate: &str, target: &NodeId) -> Self {
        Self(format!("e-{}-{}-{}", source, predicate, target))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provenance of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    /// Directly quoted in a source document
    #[default]
    Stated,
    /// Logically deduced from the text
    Inferred,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stated => "STATED",
            Self::Inferred => "INFERRED",
        }
    }

    /// Anything other than `INFERRED` reads as stated.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("INFERRED") {
            Self::Inferred
        } else {
            Self::Stated
        }
    }
}

/// Uniqueness key of a relationship: `(source, predicate, target)`
pub type TripleKey = (NodeId, String, NodeId);

/// A directed, evidenced relationship (triple)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    /// Lowercase verb phrase, e.g. `employed_by`
    pub predicate: String,
    /// Verbatim supporting quote
    #[serde(default)]
    pub evidence_text: String,
    #[serde(default)]
    pub source_filename: String,
    #[serde(default)]
    pub source_page: u32,
    #[serde(default)]
    pub confidence: Confidence,
    /// ISO date mentioned alongside the relationship, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_mentioned: Option<String>,
}

impl Edge {
    /// Create a stated edge with a derived id. The predicate is lowercased.
    pub fn new(source: impl Into<NodeId>, predicate: &str, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        let predicate = predicate.trim().to_lowercase();
        Self {
            id: EdgeId::derive(&source, &predicate, &target),
            source,
            target,
            predicate,
            evidence_text: String::new(),
            source_filename: String::new(),
            source_page: 0,
            confidence: Confidence::Stated,
            date_mentioned: None,
        }
    }

    /// Attach the quote and its location
    pub fn with_evidence(
        mut self,
        evidence_text: impl Into<String>,
        source_filename: impl Into<String>,
        source_page: u32,
    ) -> Self {
        self.evidence_text = evidence_text.into();
        self.source_filename = source_filename.into();
        self.source_page = source_page;
        self
    }

    pub fn inferred(mut self) -> Self {
        self.confidence = Confidence::Inferred;
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date_mentioned = Some(date.into());
        self
    }

    pub fn key(&self) -> TripleKey {
        (self.source.clone(), self.predicate.clone(), self.target.clone())
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source == id || &self.target == id
    }

    /// The endpoint opposite `id` (the target when `id` is neither endpoint)
    pub fn other_end(&self, id: &NodeId) -> &NodeId {
        if &self.source == id {
            &self.target
        } else {
            &self.source
        }
    }
}
