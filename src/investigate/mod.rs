//! Multi-phase investigation over the graph and the document index
//!
//! An [`Investigator`] turns one free-text question into a stream of
//! [`InvestigationEvent`]s: progress for each [`Step`], streamed report
//! text, cited sources and follow-up questions, always ending in `done`.

mod analysis;
mod context;
mod events;
mod intel;
mod pipeline;
mod session;

pub use analysis::{analysis_prompt, enrich_query, CaseContext, QueryAnalysis};
pub use context::{
    build_context, collect_sources, evidence_blocks, follow_up_prompt, synthesis_prompt,
    truncate_at_sentence, CHUNK_EXCERPT_CHARS, NO_CONTEXT_MESSAGE,
};
pub use events::{InvestigationEvent, Source, Step, StepStatus};
pub use intel::{
    collect_graph_evidence, keyword_search_evidence, lookup_entity_intel, EntityIntel,
    RelationshipGroup,
};
pub use pipeline::{
    plan_passes, InvestigationRequest, Investigator, PhaseError, PipelineError, PlannedPass,
};
pub use session::{InvestigationSession, PhaseRecord};
