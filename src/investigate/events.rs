//! Streaming event protocol
//!
//! Each event serializes to one JSON object tagged by `type`. The wire
//! framing is Server-Sent Events: `data: {json}\n\n`.

use crate::search::PageRef;
use serde::Serialize;

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    QueryAnalysis,
    EntityIntel,
    ConnectionPaths,
    GraphTraversal,
    SemanticSearch,
    KeywordSearch,
    Synthesis,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::QueryAnalysis,
        Step::EntityIntel,
        Step::ConnectionPaths,
        Step::GraphTraversal,
        Step::SemanticSearch,
        Step::KeywordSearch,
        Step::Synthesis,
    ];

    /// Human label shown next to the progress indicator
    pub fn label(&self) -> &'static str {
        match self {
            Step::QueryAnalysis => "Analyzing Query",
            Step::EntityIntel => "Entity Intelligence",
            Step::ConnectionPaths => "Connection Paths",
            Step::GraphTraversal => "Graph Traversal",
            Step::SemanticSearch => "Research",
            Step::KeywordSearch => "Keyword Search",
            Step::Synthesis => "Writing Report",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::QueryAnalysis => "query_analysis",
            Step::EntityIntel => "entity_intel",
            Step::ConnectionPaths => "connection_paths",
            Step::GraphTraversal => "graph_traversal",
            Step::SemanticSearch => "semantic_search",
            Step::KeywordSearch => "keyword_search",
            Step::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Done,
    Error,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Running)
    }
}

/// A cited document location in the final source list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub filename: String,
    pub page: PageRef,
    /// Rounded to three decimals
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvestigationEvent {
    StepStatus {
        step: Step,
        label: &'static str,
        status: StepStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Text {
        text: String,
    },
    Sources {
        sources: Vec<Source>,
    },
    FollowUps {
        follow_ups: Vec<String>,
    },
    Done {},
}

impl InvestigationEvent {
    pub fn step(step: Step, status: StepStatus, detail: Option<String>) -> Self {
        Self::StepStatus {
            step,
            label: step.label(),
            status,
            detail,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done {})
    }

    /// One Server-Sent Events frame
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
