//! Phase driver for one investigation
//!
//! Phases run strictly in order. Each emits one `running` status, does its
//! work, then one `done` or `error` status. A failing phase records the
//! failure in the session's error log and the pipeline carries on with
//! whatever it has. Only cancellation stops the sequence early, and `done`
//! is always the final event.

use super::analysis::{analysis_prompt, enrich_query, CaseContext, QueryAnalysis};
use super::context::{
    build_context, collect_sources, follow_up_prompt, synthesis_prompt, NO_CONTEXT_MESSAGE,
};
use super::events::{InvestigationEvent, Step, StepStatus};
use super::intel::{collect_graph_evidence, keyword_search_evidence, lookup_entity_intel};
use super::session::{InvestigationSession, PhaseRecord};
use crate::cancel::CancellationToken;
use crate::collaborators::Collaborators;
use crate::config::InvestigationConfig;
use crate::model::{extract_json_array, ModelError, ResponseFormat, TextModel};
use crate::query::{detect_connection_query, trace_connection, ConnectionTrace};
use crate::search::{Candidate, MetadataFilter, SearchError, SearchRequest, Searcher};
use crate::storage::{StorageError, StorageResult};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Events buffered between the pipeline task and its consumer
const EVENT_BUFFER: usize = 64;
/// Follow-up questions kept
const MAX_FOLLOW_UPS: usize = 4;

/// Why a phase produced no result
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unusable model reply: {0}")]
    Parse(String),
    #[error("cancelled")]
    Cancelled,
}

impl PhaseError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PhaseError::Cancelled)
    }
}

/// Why the phase sequence stopped early
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("investigation cancelled")]
    Cancelled,
    #[error("{0}")]
    Panicked(String),
}

/// A question to investigate, optionally with case background
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestigationRequest {
    pub query: String,
    #[serde(default)]
    pub case: Option<CaseContext>,
}

impl InvestigationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            case: None,
        }
    }

    pub fn with_case(mut self, case: CaseContext) -> Self {
        self.case = Some(case);
        self
    }

    /// The query with case background appended
    pub fn enriched_query(&self) -> String {
        match &self.case {
            Some(case) => enrich_query(&self.query, case),
            None => self.query.clone(),
        }
    }
}

/// Runs investigations against shared collaborators.
///
/// Cheap to clone; concurrent investigations share nothing but the
/// collaborators themselves.
#[derive(Clone)]
pub struct Investigator {
    collaborators: Collaborators,
    config: InvestigationConfig,
    searcher: Searcher,
}

impl Investigator {
    pub fn new(collaborators: Collaborators, config: InvestigationConfig) -> Self {
        let searcher = collaborators.searcher(&config);
        Self {
            collaborators,
            config,
            searcher,
        }
    }

    pub fn config(&self) -> &InvestigationConfig {
        &self.config
    }

    /// Spawn an investigation and return its event stream.
    ///
    /// Dropping the receiver cancels the run at its next emission.
    pub fn start(
        &self,
        request: InvestigationRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<InvestigationEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let investigator = self.clone();
        tokio::spawn(async move {
            investigator.run(request, tx, cancel).await;
        });
        rx
    }

    /// Run every phase, sending events to `events`, and return the final
    /// session state.
    pub async fn run(
        &self,
        request: InvestigationRequest,
        events: mpsc::Sender<InvestigationEvent>,
        cancel: CancellationToken,
    ) -> InvestigationSession {
        let session = InvestigationSession::new(request.enriched_query(), QueryAnalysis::default());
        tracing::info!(id = %session.id, query = %request.query, "investigation started");
        let mut run = Run {
            investigator: self,
            events,
            cancel,
            session,
            raw_query: request.query,
        };

        let outcome = AssertUnwindSafe(run.phases()).catch_unwind().await;
        let (failure, cancelled) = match outcome {
            Ok(Ok(())) => (None, false),
            Ok(Err(PipelineError::Cancelled)) => {
                tracing::info!("investigation cancelled");
                (None, true)
            }
            Ok(Err(e)) => (Some(e.to_string()), false),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(error = %message, "investigation pipeline crashed");
                (Some(PipelineError::Panicked(message).to_string()), false)
            }
        };
        run.close(failure, cancelled).await;

        tracing::info!(
            id = %run.session.id,
            elapsed_ms = run.session.elapsed_ms(),
            chunks = run.session.pool.len(),
            errors = run.session.errors_log.len(),
            "investigation finished"
        );
        run.session
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The search pass planned for one slot of the semantic phase
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPass {
    pub number: usize,
    pub request: SearchRequest,
}

/// Up to three semantic passes: the query itself, a reformulation, and a
/// focused pass pairing the primary entity with its closest neighbour.
pub fn plan_passes(session: &InvestigationSession, config: &InvestigationConfig) -> Vec<PlannedPass> {
    let analysis = &session.analysis;
    let reformulations = &analysis.reformulated_queries;
    let discovered = session.discovered_entities();
    let pass = |number, query: String, fetch_k| PlannedPass {
        number,
        request: SearchRequest::new(query, fetch_k, config.rerank_top_n),
    };

    let mut passes = vec![pass(1, session.query.clone(), config.pass_fetch_k)];

    let reformulated = match reformulations.as_slice() {
        [first, second, ..] => Some(format!("{first} {second}")),
        [only] => Some(only.clone()),
        [] if !discovered.is_empty() => {
            let names: Vec<&str> = discovered.iter().take(3).map(String::as_str).collect();
            Some(format!("{} {}", session.query, names.join(" ")))
        }
        [] => None,
    };
    if let Some(query) = reformulated {
        passes.push(pass(2, query, config.pass_fetch_k));
    }

    let top_connected = discovered
        .first()
        .or_else(|| analysis.secondary_entities.first());
    let focused = match top_connected {
        Some(top) if analysis.has_entity() => Some(format!("{} {top}", analysis.primary_entity)),
        _ if reformulations.len() >= 3 => Some(reformulations[2].clone()),
        None if reformulations.len() >= 2 => Some(reformulations[1].clone()),
        _ => None,
    };
    if let Some(query) = focused {
        passes.push(pass(3, query, config.focused_pass_fetch_k));
    }
    passes
}

/// State of a single in-flight investigation
struct Run<'a> {
    investigator: &'a Investigator,
    events: mpsc::Sender<InvestigationEvent>,
    cancel: CancellationToken,
    /// Query as the user typed it, before case enrichment
    raw_query: String,
    session: InvestigationSession,
}

impl<'a> Run<'a> {
    fn config(&self) -> &'a InvestigationConfig {
        &self.investigator.config
    }

    fn collaborators(&self) -> &'a Collaborators {
        &self.investigator.collaborators
    }

    fn model(&self) -> Arc<dyn TextModel> {
        self.investigator.collaborators.model.clone()
    }

    async fn send(&self, event: InvestigationEvent) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if self.events.send(event).await.is_err() {
            // Consumer went away
            self.cancel.cancel();
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    async fn start(&mut self, step: Step, detail: Option<String>) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tracing::debug!(%step, "phase started");
        self.session.phase_log.push(PhaseRecord {
            step,
            status: StepStatus::Running,
            detail: detail.clone(),
        });
        self.send(InvestigationEvent::step(step, StepStatus::Running, detail))
            .await
    }

    async fn finish(
        &mut self,
        step: Step,
        status: StepStatus,
        detail: Option<String>,
    ) -> Result<(), PipelineError> {
        match status {
            StepStatus::Error => tracing::warn!(%step, detail = ?detail, "phase failed"),
            _ => tracing::info!(%step, detail = ?detail, "phase done"),
        }
        self.session.phase_log.push(PhaseRecord {
            step,
            status,
            detail: detail.clone(),
        });
        self.send(InvestigationEvent::step(step, status, detail)).await
    }

    async fn done(&mut self, step: Step, detail: impl Into<String>) -> Result<(), PipelineError> {
        self.finish(step, StepStatus::Done, Some(detail.into())).await
    }

    async fn text(&mut self, text: impl Into<String>) -> Result<(), PipelineError> {
        self.send(InvestigationEvent::text(text)).await
    }

    /// Await an external call under the per-call timeout, abandoning it on
    /// cancellation
    async fn call<T, E>(&self, fut: impl Future<Output = Result<T, E>>) -> Result<T, PhaseError>
    where
        PhaseError: From<E>,
    {
        let timeout = self.config().call_timeout();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PhaseError::Cancelled),
            result = tokio::time::timeout(timeout, fut) => match result {
                Ok(result) => Ok(result?),
                Err(_) => Err(PhaseError::Timeout(timeout)),
            },
        }
    }

    /// Run blocking store work off the executor
    async fn store_call<T, F>(&self, f: F) -> Result<T, PhaseError>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        self.call(async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(result) => result,
                Err(e) => Err(StorageError::Task(e.to_string())),
            }
        })
        .await
    }

    /// Record a phase failure for the data-gaps section
    fn log_gap(&mut self, phase: &str, error: &PhaseError, consequence: &str) {
        tracing::warn!(phase, error = %error, "{consequence}");
        self.session
            .errors_log
            .push(format!("{phase}: {error} ({consequence})"));
    }

    async fn phases(&mut self) -> Result<(), PipelineError> {
        self.query_analysis().await?;
        self.entity_intel().await?;
        self.connection_paths().await?;
        self.graph_traversal().await?;
        self.semantic_search().await?;
        self.keyword_search().await?;
        self.synthesis().await
    }

    async fn query_analysis(&mut self) -> Result<(), PipelineError> {
        let step = Step::QueryAnalysis;
        self.start(step, None).await?;

        let prompt = analysis_prompt(&self.session.query);
        let model = self.model();
        let outcome = self
            .call(model.generate(&prompt, ResponseFormat::Json))
            .await
            .and_then(|reply| {
                QueryAnalysis::parse(&reply)
                    .ok_or_else(|| PhaseError::Parse("expected a JSON object".to_string()))
            });

        match outcome {
            Ok(analysis) => {
                let detail = analysis.summary();
                self.session.analysis = analysis;
                self.done(step, detail).await
            }
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(e) => {
                self.log_gap("Query Analysis", &e, "fell back to raw query");
                self.session.analysis = QueryAnalysis::fallback(&self.session.query);
                self.finish(step, StepStatus::Error, Some("Falling back to raw query".into()))
                    .await
            }
        }
    }

    async fn entity_intel(&mut self) -> Result<(), PipelineError> {
        let step = Step::EntityIntel;
        self.start(step, None).await?;
        if !self.session.analysis.has_entity() {
            return self.done(step, "Skipped: no named entity").await;
        }

        let store = self.collaborators().records.clone();
        let name = self.session.analysis.primary_entity.clone();
        match self
            .store_call(move || lookup_entity_intel(store.as_ref(), &name))
            .await
        {
            Ok(Some(intel)) => {
                let detail = format!(
                    "{} connections, {} linked entities",
                    intel.edge_count,
                    intel.connected_entities.len()
                );
                self.session.intel = Some(intel);
                self.done(step, detail).await
            }
            Ok(None) => self.done(step, "Not found in knowledge graph").await,
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(e) => {
                self.log_gap("Entity Intel", &e, "entity profile unavailable");
                self.finish(step, StepStatus::Error, Some(e.to_string())).await
            }
        }
    }

    async fn connection_paths(&mut self) -> Result<(), PipelineError> {
        let step = Step::ConnectionPaths;
        self.start(step, None).await?;
        let Some((entity_a, entity_b)) = detect_connection_query(&self.raw_query) else {
            return self.done(step, "Skipped").await;
        };
        tracing::debug!(%entity_a, %entity_b, "connection query detected");

        let graph = self.collaborators().graph.clone();
        match self.store_call(move || graph.load()).await {
            Ok(snapshot) => {
                let trace = trace_connection(&snapshot, &entity_a, &entity_b);
                let detail = match &trace {
                    ConnectionTrace::Unresolved(missing) => {
                        format!("Not in knowledge graph: {}", missing.join(", "))
                    }
                    ConnectionTrace::SameEntity => "Same entity".to_string(),
                    ConnectionTrace::NoPath => "No path found".to_string(),
                    ConnectionTrace::Paths(paths) => format!("{} path(s) found", paths.len()),
                };
                if !matches!(trace, ConnectionTrace::Unresolved(_)) {
                    self.session.connection_narrative =
                        Some(trace.render(&snapshot, &entity_a, &entity_b));
                }
                self.done(step, detail).await
            }
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(e) => {
                self.log_gap("Connection Paths", &e, "path narrative unavailable");
                self.finish(step, StepStatus::Error, Some(e.to_string())).await
            }
        }
    }

    async fn graph_traversal(&mut self) -> Result<(), PipelineError> {
        let step = Step::GraphTraversal;
        self.start(step, None).await?;
        let Some(intel) = &self.session.intel else {
            return self.done(step, "Skipped").await;
        };

        let config = self.config();
        let (hops, max_edges, per_direction) = (
            config.graph_max_hops,
            config.graph_max_edges,
            config.graph_edges_per_direction,
        );
        let start = intel.entity_id.clone();
        let store = self.collaborators().records.clone();
        let collected = self
            .store_call(move || {
                collect_graph_evidence(store.as_ref(), &start, hops, max_edges, per_direction)
            })
            .await;

        match collected {
            Ok(edges) => {
                let detail = format!("Collected {} edges across {hops} hops", edges.len());
                self.session.graph_evidence = edges;
                self.done(step, detail).await
            }
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(e) => {
                self.log_gap("Graph Traversal", &e, "graph evidence unavailable");
                self.finish(step, StepStatus::Error, Some(e.to_string())).await
            }
        }
    }

    /// Run search passes concurrently, returning results in input order
    async fn run_passes<'r>(
        &self,
        requests: impl Iterator<Item = &'r SearchRequest>,
    ) -> Vec<Result<Vec<Candidate>, PhaseError>> {
        let searcher = &self.investigator.searcher;
        futures::future::join_all(requests.map(|request| self.call(searcher.search_pass(request))))
            .await
    }

    async fn semantic_search(&mut self) -> Result<(), PipelineError> {
        let step = Step::SemanticSearch;
        let passes = plan_passes(&self.session, self.config());
        self.start(step, Some(format!("Running {} passes", passes.len())))
            .await?;

        let results = self.run_passes(passes.iter().map(|p| &p.request)).await;

        let mut errors = Vec::new();
        let mut completed = 0;
        for (pass, result) in passes.iter().zip(results) {
            match result {
                Ok(chunks) => {
                    let added = self.session.pool.extend(chunks);
                    tracing::debug!(pass = pass.number, added, "search pass merged");
                    completed += 1;
                }
                Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
                Err(e) => errors.push(format!("Pass {}: {e}", pass.number)),
            }
        }

        if !errors.is_empty() {
            let summary = format!("{} pass(es) failed: {}", errors.len(), errors.join("; "));
            tracing::warn!(%summary, "semantic search degraded");
            self.session
                .errors_log
                .push(format!("Semantic Search: {summary}"));
        }

        if !errors.is_empty() && self.session.pool.is_empty() {
            let detail = format!("All passes failed: {}", errors.join("; "));
            return self.finish(step, StepStatus::Error, Some(detail)).await;
        }
        let mut detail = format!(
            "{completed} passes, {} unique chunks",
            self.session.pool.len()
        );
        if !errors.is_empty() {
            detail.push_str(&format!(" ({} errors)", errors.len()));
        }
        self.done(step, detail).await
    }

    async fn keyword_search(&mut self) -> Result<(), PipelineError> {
        let step = Step::KeywordSearch;
        self.start(step, None).await?;

        let config = self.config();
        let names = self.session.search_names();

        // Chunks from documents tagged with each name
        let filtered: Vec<SearchRequest> = names
            .iter()
            .take(config.keyword_filter_names)
            .map(|name| {
                SearchRequest::new(name.clone(), config.keyword_fetch_k, config.rerank_top_n)
                    .with_filter(MetadataFilter::people_in(name))
                    .without_rerank()
            })
            .collect();
        let results = self.run_passes(filtered.iter()).await;
        let mut errors = Vec::new();
        for (request, result) in filtered.iter().zip(results) {
            match result {
                Ok(chunks) => {
                    self.session.pool.extend(chunks);
                }
                Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
                Err(e) => errors.push(format!("{}: {e}", request.query)),
            }
        }
        if !errors.is_empty() {
            let summary = format!(
                "{} filtered quer{} failed: {}",
                errors.len(),
                if errors.len() == 1 { "y" } else { "ies" },
                errors.join("; ")
            );
            tracing::warn!(%summary, "keyword search degraded");
            self.session
                .errors_log
                .push(format!("Keyword Search: {summary}"));
        }

        // Edges whose evidence quotes a name
        let matches = if names.is_empty() {
            Ok(Vec::new())
        } else {
            let store = self.collaborators().records.clone();
            let names: Vec<String> = names
                .into_iter()
                .take(config.keyword_evidence_names)
                .collect();
            let limit = config.keyword_evidence_limit;
            self.store_call(move || keyword_search_evidence(store.as_ref(), &names, limit))
                .await
        };

        match matches {
            Ok(edges) => {
                let mut detail = format!(
                    "{} total chunks, {} graph matches",
                    self.session.pool.len(),
                    edges.len()
                );
                if !errors.is_empty() {
                    detail.push_str(&format!(" ({} errors)", errors.len()));
                }
                self.session.keyword_matches = edges;
                self.done(step, detail).await
            }
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(e) => {
                self.log_gap("Keyword Search", &e, "keyword matches unavailable");
                self.finish(step, StepStatus::Error, Some(e.to_string())).await
            }
        }
    }

    async fn synthesis(&mut self) -> Result<(), PipelineError> {
        let step = Step::Synthesis;
        self.start(step, None).await?;

        let Some(context) = build_context(&self.session) else {
            self.text(NO_CONTEXT_MESSAGE).await?;
            return self.done(step, "No context available").await;
        };

        let prompt = synthesis_prompt(&context, &self.session.query);
        match self.stream_report(&prompt).await {
            Ok(()) => self.finish(step, StepStatus::Done, None).await?,
            Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, "report generation failed");
                self.text(format!("\n\n**Report generation error:** {e}"))
                    .await?;
                self.finish(step, StepStatus::Error, Some("Generation failed".into()))
                    .await?;
            }
        }

        let sources = collect_sources(self.session.pool.chunks());
        self.send(InvestigationEvent::Sources { sources }).await?;
        self.follow_ups().await
    }

    /// Forward report chunks as they arrive
    async fn stream_report(&mut self, prompt: &str) -> Result<(), PhaseError> {
        let model = self.model();
        let mut stream = self.call(model.generate_stream(prompt)).await?;
        let idle = self.config().stream_idle_timeout();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PhaseError::Cancelled),
                next = tokio::time::timeout(idle, stream.next()) => {
                    next.map_err(|_| PhaseError::Timeout(idle))?
                }
            };
            match next {
                None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.session.report.push_str(&chunk);
                    self.text(chunk)
                        .await
                        .map_err(|_| PhaseError::Cancelled)?;
                }
            }
        }
    }

    /// Best effort: a failure here omits the event
    async fn follow_ups(&mut self) -> Result<(), PipelineError> {
        let prompt = follow_up_prompt(&self.session, &self.session.query);
        let model = self.model();
        match self.call(model.generate(&prompt, ResponseFormat::Text)).await {
            Ok(reply) => {
                let follow_ups: Vec<String> = extract_json_array(&reply)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|q| q.as_str())
                    .map(str::to_string)
                    .take(MAX_FOLLOW_UPS)
                    .collect();
                if follow_ups.is_empty() {
                    tracing::debug!("no follow-up questions in model reply");
                    return Ok(());
                }
                self.send(InvestigationEvent::FollowUps { follow_ups }).await
            }
            Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::debug!(error = %e, "follow-up generation failed");
                Ok(())
            }
        }
    }

    /// Terminate the event stream: close any open step, report a crash,
    /// then send `done`. Sends here ignore cancellation.
    async fn close(&mut self, failure: Option<String>, cancelled: bool) {
        if let Some(step) = self.session.open_step() {
            let detail = if cancelled { "Cancelled" } else { "Pipeline error" };
            self.session.phase_log.push(PhaseRecord {
                step,
                status: StepStatus::Error,
                detail: Some(detail.to_string()),
            });
            let _ = self
                .events
                .send(InvestigationEvent::step(step, StepStatus::Error, Some(detail.into())))
                .await;
        }
        if let Some(message) = failure {
            let _ = self
                .events
                .send(InvestigationEvent::text(format!("\n\n**Pipeline error:** {message}")))
                .await;
        }
        let _ = self.events.send(InvestigationEvent::Done {}).await;
    }
}
