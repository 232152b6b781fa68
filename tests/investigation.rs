//! End-to-end investigation runs against in-memory collaborators

mod common;

use casegraph::config::InvestigationConfig;
use casegraph::investigate::{
    InvestigationEvent, InvestigationRequest, Investigator, Step, StepStatus, NO_CONTEXT_MESSAGE,
};
use casegraph::model::MockTextModel;
use casegraph::search::{MemoryVectorIndex, MetadataFilter, VectorError, VectorIndex, VectorMatch};
use casegraph::{CancellationToken, Collaborators};
use common::{acme_graph, collect, detail_of, step_sequence, streamed_text, Doc, Fixture};
use std::sync::Arc;
use tokio::sync::mpsc;

const ANALYSIS: &str = r#"{"primary_entity": "John Smith", "secondary_entities": ["Acme Corp"],
    "key_terms": ["employment"], "reformulated_queries": ["John Smith Acme employment", "Acme Corp payroll"]}"#;

const DOCS: &[Doc] = &[
    Doc {
        text: "John Smith was employed by Acme Corp as a courier in 1999.",
        filename: "payroll.pdf",
        page: 3,
        people: &["John Smith"],
    },
    Doc {
        text: "Flight manifest lists Jane Doe and two unnamed passengers.",
        filename: "flights.pdf",
        page: 9,
        people: &["Jane Doe"],
    },
];

fn scripted_model() -> MockTextModel {
    MockTextModel::new()
        .with_response("Analyze this query", ANALYSIS)
        .with_response(
            "follow-up questions",
            r#"["Who hired John Smith?", "What did Acme Corp pay him?"]"#,
        )
        .with_stream([
            "## Executive Summary\n",
            "John Smith worked for Acme Corp [Source: payroll.pdf].",
        ])
}

async fn acme_fixture(model: MockTextModel) -> Fixture {
    let fixture = Fixture::new(model);
    let (nodes, edges) = acme_graph();
    fixture.add_graph(&nodes, &edges);
    fixture.index_docs(DOCS).await;
    fixture
}

fn investigator(fixture: &Fixture) -> Investigator {
    Investigator::new(fixture.collaborators(), InvestigationConfig::default())
}

fn every_step_done() -> Vec<(Step, StepStatus)> {
    Step::ALL
        .iter()
        .flat_map(|s| [(*s, StepStatus::Running), (*s, StepStatus::Done)])
        .collect()
}

// === Full Run ===

#[tokio::test]
async fn connection_question_runs_every_phase_in_order() {
    let fixture = acme_fixture(scripted_model()).await;
    let rx = investigator(&fixture).start(
        InvestigationRequest::new("How is John Smith connected to Acme Corp?"),
        CancellationToken::new(),
    );
    let events = collect(rx).await;

    assert_eq!(step_sequence(&events), every_step_done());
    assert!(events.last().unwrap().is_done());
    assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);

    assert_eq!(
        detail_of(&events, Step::QueryAnalysis, StepStatus::Done).as_deref(),
        Some("Primary: John Smith, +1 entities")
    );
    assert_eq!(
        detail_of(&events, Step::EntityIntel, StepStatus::Done).as_deref(),
        Some("1 connections, 1 linked entities")
    );
    assert_eq!(
        detail_of(&events, Step::ConnectionPaths, StepStatus::Done).as_deref(),
        Some("1 path(s) found")
    );

    assert!(streamed_text(&events).starts_with("## Executive Summary"));
}

#[tokio::test]
async fn sources_and_follow_ups_trail_the_report() {
    let fixture = acme_fixture(scripted_model()).await;
    let rx = investigator(&fixture).start(
        InvestigationRequest::new("How is John Smith connected to Acme Corp?"),
        CancellationToken::new(),
    );
    let events = collect(rx).await;

    let n = events.len();
    let InvestigationEvent::Sources { sources } = &events[n - 3] else {
        panic!("expected sources, got {:?}", events[n - 3]);
    };
    assert!(sources.iter().any(|s| s.filename == "payroll.pdf"));
    assert!(sources.len() <= 20);

    let InvestigationEvent::FollowUps { follow_ups } = &events[n - 2] else {
        panic!("expected follow-ups, got {:?}", events[n - 2]);
    };
    assert_eq!(follow_ups.len(), 2);
}

#[tokio::test]
async fn path_narrative_leads_the_synthesis_context() {
    let fixture = acme_fixture(scripted_model()).await;
    let events = collect(investigator(&fixture).start(
        InvestigationRequest::new("How is Acme Corp connected to John Smith?"),
        CancellationToken::new(),
    ))
    .await;
    assert!(events.last().unwrap().is_done());

    let prompts = fixture.model.prompts();
    let synthesis = prompts
        .iter()
        .find(|p| p.contains("INVESTIGATION QUERY"))
        .expect("synthesis prompt");
    let narrative = synthesis.find("GRAPH CONNECTIONS FOUND").unwrap();
    let document = synthesis.find("[Source: payroll.pdf, Page: 3]").unwrap();
    assert!(narrative < document);
    assert!(synthesis.contains("Acme Corp <--[employed_by]-- John Smith"));
    assert!(synthesis.contains("ENTITY PROFILE: John Smith"));
    assert!(!synthesis.contains("DATA GAPS"));
    assert_eq!(fixture.model.stream_calls(), 1);
}

#[tokio::test]
async fn case_background_reaches_the_analysis_prompt() {
    let fixture = acme_fixture(scripted_model()).await;
    let request = InvestigationRequest::new("Who paid John Smith?").with_case(
        casegraph::investigate::CaseContext {
            summary: "Payroll irregularities at Acme".into(),
            ..Default::default()
        },
    );
    collect(investigator(&fixture).start(request, CancellationToken::new())).await;

    let prompts = fixture.model.prompts();
    assert!(prompts[0].contains("Case background: Payroll irregularities at Acme"));
}

// === Degradation ===

#[tokio::test]
async fn failed_analysis_falls_back_and_is_reported_as_a_gap() {
    let model = MockTextModel::new()
        .with_failure("Analyze this query", "quota exceeded")
        .with_stream(["Report."]);
    let fixture = acme_fixture(model).await;
    let events = collect(investigator(&fixture).start(
        InvestigationRequest::new("payroll records 1999"),
        CancellationToken::new(),
    ))
    .await;

    assert_eq!(
        detail_of(&events, Step::QueryAnalysis, StepStatus::Error).as_deref(),
        Some("Falling back to raw query")
    );
    assert_eq!(
        detail_of(&events, Step::EntityIntel, StepStatus::Done).as_deref(),
        Some("Skipped: no named entity")
    );
    assert!(events.last().unwrap().is_done());

    let prompts = fixture.model.prompts();
    let synthesis = prompts
        .iter()
        .find(|p| p.contains("INVESTIGATION QUERY"))
        .expect("synthesis still runs on document evidence");
    assert!(synthesis.contains("DATA GAPS"));
    assert!(synthesis.contains("- Query Analysis:"));
}

#[tokio::test]
async fn stream_failure_is_reported_inline() {
    let model = MockTextModel::new()
        .with_response("Analyze this query", ANALYSIS)
        .with_stream(["## Executive Summary\n"])
        .with_stream_failure("connection reset");
    let fixture = acme_fixture(model).await;
    let events = collect(investigator(&fixture).start(
        InvestigationRequest::new("How is John Smith connected to Acme Corp?"),
        CancellationToken::new(),
    ))
    .await;

    let text = streamed_text(&events);
    assert!(text.starts_with("## Executive Summary\n"));
    assert!(text.contains("**Report generation error:**"));
    assert_eq!(
        detail_of(&events, Step::Synthesis, StepStatus::Error).as_deref(),
        Some("Generation failed")
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, InvestigationEvent::Sources { .. })));
    assert!(events.last().unwrap().is_done());
}

#[tokio::test]
async fn empty_store_produces_no_context_message_without_generation() {
    let fixture = Fixture::new(MockTextModel::new());
    let events = collect(investigator(&fixture).start(
        InvestigationRequest::new("What happened in 2002?"),
        CancellationToken::new(),
    ))
    .await;

    assert_eq!(step_sequence(&events), every_step_done());
    let texts: Vec<&InvestigationEvent> = events
        .iter()
        .filter(|e| matches!(e, InvestigationEvent::Text { .. }))
        .collect();
    assert_eq!(texts, vec![&InvestigationEvent::text(NO_CONTEXT_MESSAGE)]);
    assert_eq!(events.len(), 16);
    assert!(events[15].is_done());
    assert_eq!(fixture.model.stream_calls(), 0);
}

/// Serves unfiltered queries; every metadata-filtered query gets a 503
struct FilteredQueryOutage(Arc<MemoryVectorIndex>);

#[async_trait::async_trait]
impl VectorIndex for FilteredQueryOutage {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        if filter.is_some() {
            return Err(VectorError::Api {
                status: 503,
                body: "filter service unavailable".into(),
            });
        }
        self.0.query(vector, top_k, None).await
    }
}

#[tokio::test]
async fn failed_filtered_queries_are_reported_as_a_gap() {
    let fixture = acme_fixture(scripted_model()).await;
    let collaborators = Collaborators::new(
        fixture.store.clone(),
        fixture.model.clone(),
        Arc::new(FilteredQueryOutage(fixture.index.clone())),
    );
    let (tx, rx) = mpsc::channel(256);
    let session = Investigator::new(collaborators, InvestigationConfig::default())
        .run(
            InvestigationRequest::new("How is John Smith connected to Acme Corp?"),
            tx,
            CancellationToken::new(),
        )
        .await;
    let events = collect(rx).await;

    let gap = session
        .errors_log
        .iter()
        .find(|e| e.starts_with("Keyword Search: "))
        .expect("keyword gap logged");
    assert!(gap.contains("filtered quer"));
    assert!(gap.contains("503"));

    let detail = detail_of(&events, Step::KeywordSearch, StepStatus::Done).unwrap();
    assert!(detail.contains("graph matches ("), "detail was {detail}");
    assert!(detail.ends_with(" errors)"));

    let prompts = fixture.model.prompts();
    let synthesis = prompts
        .iter()
        .find(|p| p.contains("INVESTIGATION QUERY"))
        .expect("synthesis prompt");
    assert!(synthesis.contains("DATA GAPS"));
    assert!(synthesis.contains("- Keyword Search:"));
    assert!(events.last().unwrap().is_done());
}

// === Cancellation ===

#[tokio::test]
async fn dropped_consumer_stops_before_external_calls() {
    let fixture = acme_fixture(scripted_model()).await;
    let embeds_before = fixture.model.embed_calls();
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let cancel = CancellationToken::new();
    let session = investigator(&fixture)
        .run(
            InvestigationRequest::new("How is John Smith connected to Acme Corp?"),
            tx,
            cancel.clone(),
        )
        .await;

    assert!(cancel.is_cancelled());
    assert!(fixture.model.generate_calls() <= 1);
    assert_eq!(fixture.model.embed_calls(), embeds_before);
    assert_eq!(fixture.model.stream_calls(), 0);
    let last = session.phase_log.last().unwrap();
    assert_eq!(last.status, StepStatus::Error);
    assert_eq!(last.detail.as_deref(), Some("Cancelled"));
}

#[tokio::test]
async fn cancelling_mid_report_closes_the_stream() {
    let chunks: Vec<String> = (0..10).map(|i| format!("chunk {i}. ")).collect();
    let model = MockTextModel::new()
        .with_response("Analyze this query", ANALYSIS)
        .with_stream(chunks);
    let fixture = acme_fixture(model).await;

    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let investigator = investigator(&fixture);
        let cancel = cancel.clone();
        async move {
            investigator
                .run(
                    InvestigationRequest::new("How is John Smith connected to Acme Corp?"),
                    tx,
                    cancel,
                )
                .await
        }
    });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, InvestigationEvent::Text { .. }) {
            cancel.cancel();
        }
        let done = event.is_done();
        events.push(event);
        if done {
            break;
        }
    }
    let session = run.await.unwrap();

    let text_events = events
        .iter()
        .filter(|e| matches!(e, InvestigationEvent::Text { .. }))
        .count();
    assert!(text_events >= 1 && text_events < 10);
    assert!(!events
        .iter()
        .any(|e| matches!(e, InvestigationEvent::Sources { .. })));
    assert_eq!(
        detail_of(&events, Step::Synthesis, StepStatus::Error).as_deref(),
        Some("Cancelled")
    );
    assert!(events.last().unwrap().is_done());
    assert!(session.report.len() < 100);
}

#[tokio::test]
async fn pre_cancelled_token_only_emits_done() {
    let fixture = acme_fixture(scripted_model()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let events = collect(investigator(&fixture).start(
        InvestigationRequest::new("How is John Smith connected to Acme Corp?"),
        cancel,
    ))
    .await;
    assert_eq!(events, vec![InvestigationEvent::Done {}]);
    assert_eq!(fixture.model.generate_calls(), 0);
}

// === Wire Format ===

#[tokio::test]
async fn events_encode_as_sse_frames() {
    let fixture = Fixture::new(MockTextModel::new());
    let events = collect(investigator(&fixture).start(
        InvestigationRequest::new("anything"),
        CancellationToken::new(),
    ))
    .await;

    let first = events[0].to_sse().unwrap();
    assert_eq!(
        first,
        "data: {\"type\":\"step_status\",\"step\":\"query_analysis\",\"label\":\"Analyzing Query\",\"status\":\"running\"}\n\n"
    );
    assert_eq!(events.last().unwrap().to_sse().unwrap(), "data: {\"type\":\"done\"}\n\n");
}
