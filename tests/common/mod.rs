//! Shared fixtures for casegraph integration tests
//!
//! Everything runs in memory: a SQLite store, the scripted text model and a
//! brute-force vector index whose embeddings come from the same model.

#![allow(dead_code)]

use casegraph::investigate::{InvestigationEvent, Step, StepStatus};
use casegraph::model::{MockTextModel, TextModel};
use casegraph::search::{MemoryVectorIndex, VectorRecord};
use casegraph::{Collaborators, Edge, EntityType, GraphStore, Node, OpenStore, SqliteStore};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// A document chunk to index
pub struct Doc {
    pub text: &'static str,
    pub filename: &'static str,
    pub page: i64,
    pub people: &'static [&'static str],
}

pub struct Fixture {
    pub store: Arc<SqliteStore>,
    pub model: Arc<MockTextModel>,
    pub index: Arc<MemoryVectorIndex>,
}

impl Fixture {
    pub fn new(model: MockTextModel) -> Self {
        Self {
            store: Arc::new(SqliteStore::open_in_memory().expect("in-memory store")),
            model: Arc::new(model),
            index: Arc::new(MemoryVectorIndex::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.store.clone(), self.model.clone(), self.index.clone())
    }

    pub fn add_graph(&self, nodes: &[Node], edges: &[Edge]) {
        self.store
            .add_elements(nodes, edges)
            .expect("failed to seed graph");
    }

    /// Embed and index documents with the fixture's model
    pub async fn index_docs(&self, docs: &[Doc]) {
        for (i, doc) in docs.iter().enumerate() {
            let values = self.model.embed(doc.text).await.expect("mock embed");
            let metadata = match json!({
                "text": doc.text,
                "filename": doc.filename,
                "page": doc.page,
                "people": doc.people,
            }) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            self.index.upsert(VectorRecord {
                id: format!("chunk-{i}"),
                values,
                metadata,
            });
        }
    }
}

/// Acme Corp employs John Smith; Jane Doe sits on the board
pub fn acme_graph() -> (Vec<Node>, Vec<Edge>) {
    let nodes = vec![
        Node::new("acme_corp", "Acme Corp", EntityType::Organization)
            .with_description("Holding company registered in 1998"),
        Node::new("john_smith", "John Smith", EntityType::Person),
        Node::new("jane_doe", "Jane Doe", EntityType::Person),
    ];
    let edges = vec![
        Edge::new("john_smith", "employed_by", "acme_corp").with_evidence(
            "John Smith was employed by Acme Corp from 1999.",
            "payroll.pdf",
            3,
        ),
        Edge::new("jane_doe", "director_of", "acme_corp").with_evidence(
            "Jane Doe served as a director of Acme Corp.",
            "board.pdf",
            1,
        ),
    ];
    (nodes, edges)
}

/// `(step, status)` pairs in emission order
pub fn step_sequence(events: &[InvestigationEvent]) -> Vec<(Step, StepStatus)> {
    events
        .iter()
        .filter_map(|e| match e {
            InvestigationEvent::StepStatus { step, status, .. } => Some((*step, *status)),
            _ => None,
        })
        .collect()
}

/// Concatenated text events
pub fn streamed_text(events: &[InvestigationEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            InvestigationEvent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn detail_of(events: &[InvestigationEvent], wanted: Step, wanted_status: StepStatus) -> Option<String> {
    events.iter().find_map(|e| match e {
        InvestigationEvent::StepStatus {
            step,
            status,
            detail,
            ..
        } if *step == wanted && *status == wanted_status => detail.clone(),
        _ => None,
    })
}

/// Drain a receiver until `done` or the channel closes
pub async fn collect(mut rx: tokio::sync::mpsc::Receiver<InvestigationEvent>) -> Vec<InvestigationEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = event.is_done();
        events.push(event);
        if done {
            break;
        }
    }
    events
}
