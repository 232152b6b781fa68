//! Deduplication against a real store

mod common;

use casegraph::config::DedupConfig;
use casegraph::dedup::Deduplicator;
use casegraph::model::{MockTextModel, TextModel};
use casegraph::{Edge, EdgeId, EntityType, GraphStore, Node, NodeId, RecordStore};
use common::Fixture;
use std::collections::HashSet;
use std::sync::Arc;

fn duplicated_graph() -> (Vec<Node>, Vec<Edge>) {
    let nodes = vec![
        Node::new("john_smith", "John Smith", EntityType::Person),
        Node::new("jsmith_2", "john smith", EntityType::Person)
            .with_description("Courier employed by Acme Corp from 1999")
            .with_alias("Johnny"),
        Node::new("acme_corp", "Acme Corp", EntityType::Organization),
        Node::new("acme_2", "ACME Corp.", EntityType::Organization),
        Node::new("jane_doe", "Jane Doe", EntityType::Person),
        // Same label, different type: stays separate
        Node::new("acme_place", "Acme Corp", EntityType::Location),
    ];
    let edges = vec![
        Edge::new("john_smith", "employed_by", "acme_corp"),
        // Duplicate triple once both ends are merged
        Edge::new("jsmith_2", "employed_by", "acme_2"),
        // Self-loop once both ends are merged
        Edge::new("jsmith_2", "same_as", "john_smith"),
        Edge::new("jane_doe", "knows", "john_smith"),
    ];
    (nodes, edges)
}

fn deduplicator(fixture: &Fixture, config: DedupConfig, model: Option<Arc<dyn TextModel>>) -> Deduplicator {
    let records: Arc<dyn RecordStore> = fixture.store.clone();
    Deduplicator::new(records, config).with_model(model)
}

/// Every edge references existing nodes and no edge is a self-loop
fn assert_graph_consistent(fixture: &Fixture) {
    let graph = fixture.store.load().unwrap();
    let ids: HashSet<&NodeId> = graph.nodes.iter().map(|n| &n.id).collect();
    for edge in &graph.edges {
        assert!(ids.contains(&edge.source), "dangling source {}", edge.source);
        assert!(ids.contains(&edge.target), "dangling target {}", edge.target);
        assert_ne!(edge.source, edge.target);
    }
}

// === Heuristic Pass ===

#[tokio::test]
async fn heuristic_pass_merges_case_and_punctuation_variants() {
    let fixture = Fixture::new(MockTextModel::new());
    let (nodes, edges) = duplicated_graph();
    fixture.add_graph(&nodes, &edges);

    let report = deduplicator(&fixture, DedupConfig::default(), None)
        .run()
        .await
        .unwrap();

    assert_eq!(report.merged, 2);
    assert_eq!(report.heuristic_merges, 2);
    assert_eq!(report.semantic_merges, 0);
    assert_eq!(report.removed_nodes, 2);
    assert_eq!(report.removed_edges, 2);

    let remaining = fixture.store.all_nodes().unwrap();
    assert_eq!(remaining.len(), 4);

    // The longest description wins; labels of absorbed nodes become aliases
    let smith = remaining.iter().find(|n| n.id.as_str() == "jsmith_2").unwrap();
    assert!(smith.aliases.contains("John Smith"));
    assert!(smith.aliases.contains("Johnny"));
    assert!(!smith.aliases.contains(&smith.label));

    let edges = fixture.store.all_edges().unwrap();
    assert_eq!(edges.len(), 2);
    assert!(edges
        .iter()
        .any(|e| e.source.as_str() == "jane_doe" && e.target.as_str() == "jsmith_2"));
    assert_graph_consistent(&fixture);
}

#[tokio::test]
async fn second_run_finds_nothing_to_merge() {
    let fixture = Fixture::new(MockTextModel::new());
    let (nodes, edges) = duplicated_graph();
    fixture.add_graph(&nodes, &edges);

    let dedup = deduplicator(&fixture, DedupConfig::default(), None);
    dedup.run().await.unwrap();
    let before = fixture.store.load().unwrap();

    let again = dedup.run().await.unwrap();
    assert_eq!(again.merged, 0);
    assert_eq!(again.removed_edges, 0);
    assert_eq!(fixture.store.load().unwrap().nodes.len(), before.nodes.len());
    assert_eq!(fixture.store.load().unwrap().edges.len(), before.edges.len());
}

#[tokio::test]
async fn retargeted_edges_take_ids_from_their_new_triple() {
    let fixture = Fixture::new(MockTextModel::new());
    let (nodes, edges) = duplicated_graph();
    fixture.add_graph(&nodes, &edges);

    let report = deduplicator(&fixture, DedupConfig::default(), None)
        .run()
        .await
        .unwrap();
    assert_eq!(report.rewritten_edges, 2);

    for edge in fixture.store.all_edges().unwrap() {
        assert_eq!(edge.id, EdgeId::derive(&edge.source, &edge.predicate, &edge.target));
    }

    // Re-ingesting a merged fact lands on the existing row
    fixture
        .store
        .add_elements(&[], &[Edge::new("jsmith_2", "employed_by", "acme_corp")])
        .unwrap();
    let edges = fixture.store.all_edges().unwrap();
    assert_eq!(edges.len(), 2);
    let triples: HashSet<_> = edges.iter().map(Edge::key).collect();
    assert_eq!(triples.len(), edges.len());
}

// === Semantic Pass ===

#[tokio::test]
async fn model_groups_merge_distinct_labels() {
    let model = MockTextModel::new().with_response(
        "deduplicating a knowledge graph",
        r#"Here you go: [["acme_corp", "acme_holdings"], ["jane_doe"]]"#,
    );
    let fixture = Fixture::new(model);
    fixture.add_graph(
        &[
            Node::new("acme_corp", "Acme Corp", EntityType::Organization),
            Node::new("acme_holdings", "Acme Holdings Ltd", EntityType::Organization)
                .with_description("Parent company"),
            Node::new("jane_doe", "Jane Doe", EntityType::Person),
        ],
        &[Edge::new("jane_doe", "director_of", "acme_corp")],
    );
    let config = DedupConfig {
        semantic_threshold: 1,
        ..DedupConfig::default()
    };

    let dedup = deduplicator(&fixture, config, Some(fixture.model.clone()));
    let report = dedup.run().await.unwrap();

    assert_eq!(report.semantic_merges, 1);
    assert_eq!(report.failed_batches, 0);
    let ids: Vec<String> = fixture
        .store
        .all_nodes()
        .unwrap()
        .into_iter()
        .map(|n| n.id.to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"jane_doe".to_string()));
    assert_graph_consistent(&fixture);

    // The model repeats its grouping; the absorbed id no longer exists
    let again = dedup.run().await.unwrap();
    assert_eq!(again.merged, 0);
    assert_eq!(again.rewritten_edges, 0);
    assert_eq!(fixture.store.all_nodes().unwrap().len(), 2);
    assert_eq!(fixture.model.generate_calls(), 2);
}

#[tokio::test]
async fn failed_model_batch_keeps_heuristic_results() {
    let model = MockTextModel::new().with_failure("deduplicating a knowledge graph", "overloaded");
    let fixture = Fixture::new(model);
    let (nodes, edges) = duplicated_graph();
    fixture.add_graph(&nodes, &edges);
    let config = DedupConfig {
        semantic_threshold: 1,
        ..DedupConfig::default()
    };

    let report = deduplicator(&fixture, config, Some(fixture.model.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.heuristic_merges, 2);
    assert_graph_consistent(&fixture);
}

#[tokio::test]
async fn small_graphs_skip_the_model() {
    let fixture = Fixture::new(MockTextModel::new());
    let (nodes, edges) = duplicated_graph();
    fixture.add_graph(&nodes, &edges);

    deduplicator(&fixture, DedupConfig::default(), Some(fixture.model.clone()))
        .run()
        .await
        .unwrap();
    assert_eq!(fixture.model.generate_calls(), 0);
}
