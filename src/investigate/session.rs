//! Per-request investigation state

use super::analysis::QueryAnalysis;
use super::events::{Step, StepStatus};
use super::intel::EntityIntel;
use crate::graph::Edge;
use crate::search::EvidencePool;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One status transition, in emission order
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRecord {
    pub step: Step,
    pub status: StepStatus,
    pub detail: Option<String>,
}

/// Everything one investigation accumulates.
///
/// Created when a request starts and dropped after `done`; nothing here
/// is shared with other requests.
#[derive(Debug)]
pub struct InvestigationSession {
    /// Correlates log lines of one run
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Query as analysed, including any case enrichment
    pub query: String,
    pub analysis: QueryAnalysis,
    pub pool: EvidencePool,
    pub intel: Option<EntityIntel>,
    pub connection_narrative: Option<String>,
    pub graph_evidence: Vec<Edge>,
    pub keyword_matches: Vec<Edge>,
    /// Phase failures, surfaced to the report as data gaps
    pub errors_log: Vec<String>,
    pub phase_log: Vec<PhaseRecord>,
    /// Streamed report text
    pub report: String,
}

impl InvestigationSession {
    pub fn new(query: impl Into<String>, analysis: QueryAnalysis) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            query: query.into(),
            analysis,
            pool: EvidencePool::new(),
            intel: None,
            connection_narrative: None,
            graph_evidence: Vec::new(),
            keyword_matches: Vec::new(),
            errors_log: Vec::new(),
            phase_log: Vec::new(),
            report: String::new(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    /// Labels of entities linked to the primary entity
    pub fn discovered_entities(&self) -> Vec<String> {
        self.intel
            .as_ref()
            .map(|i| i.connected_entities.clone())
            .unwrap_or_default()
    }

    pub fn discovered_relationships(&self) -> Vec<String> {
        self.intel
            .as_ref()
            .map(EntityIntel::relationship_names)
            .unwrap_or_default()
    }

    /// Names worth a filtered search: primary, two secondary and two
    /// discovered entities, ignoring very short names
    pub fn search_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.analysis.has_entity() {
            names.push(self.analysis.primary_entity.clone());
        }
        names.extend(self.analysis.secondary_entities.iter().take(2).cloned());
        names.extend(self.discovered_entities().into_iter().take(2));
        names.retain(|n| n.chars().count() > 2);
        names
    }

    /// The step that has a `running` record but no terminal one yet
    pub fn open_step(&self) -> Option<Step> {
        let last = self.phase_log.last()?;
        (!last.status.is_terminal()).then_some(last.step)
    }
}
