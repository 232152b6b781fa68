//! Two-pass entity deduplication
//!
//! Pass 1 folds nodes sharing a normalized label and type. Pass 2 asks the
//! text model which of the surviving entities name the same real-world
//! thing. The combined plan is then applied to the store: edges are
//! retargeted, self-loops and duplicate triples removed, and absorbed nodes
//! deleted. Running it again on the result finds nothing to merge.

mod plan;

pub use plan::{EdgeRewrite, MergePlan};

use crate::config::DedupConfig;
use crate::graph::{Edge, EdgeId, Node, NodeId};
use crate::model::{extract_json_array, ResponseFormat, TextModel};
use crate::storage::{RecordStore, StorageError};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of a deduplication run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupReport {
    /// Nodes folded into another node
    pub merged: usize,
    pub heuristic_merges: usize,
    pub semantic_merges: usize,
    /// Model batches that failed and were skipped
    pub failed_batches: usize,
    pub removed_nodes: usize,
    pub removed_edges: usize,
    pub rewritten_edges: usize,
}

fn merge_prompt(entities: &str) -> String {
    format!(
        "You are deduplicating a knowledge graph. Below is a list of entities (id | label | type | aliases).\n\
         Identify groups of entities that refer to the SAME real-world entity and should be merged.\n\
         Only group entities that are clearly the same (e.g., 'FBI' and 'Federal Bureau of Investigation', \
         'Les Wexner' and 'Leslie Wexner').\n\
         Do NOT merge entities that are merely related.\n\n\
         ENTITIES:\n{entities}\n\n\
         Return a JSON array of merge groups. Each group is an array of entity IDs to merge.\n\
         Example: [[\"id_1\", \"id_2\"], [\"id_3\", \"id_4\", \"id_5\"]]\n\
         If no merges needed, return an empty array: []"
    )
}

/// Id groups from the model's reply; anything malformed is dropped
fn parse_merge_groups(reply: &str) -> Option<Vec<Vec<NodeId>>> {
    let groups = extract_json_array(reply)?;
    Some(
        groups
            .iter()
            .filter_map(|group| group.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str())
                    .map(NodeId::from)
                    .collect::<Vec<_>>()
            })
            .filter(|ids| ids.len() >= 2)
            .collect(),
    )
}

/// Runs deduplication against a record store
pub struct Deduplicator {
    store: Arc<dyn RecordStore>,
    model: Option<Arc<dyn TextModel>>,
    config: DedupConfig,
}

impl Deduplicator {
    /// Heuristic-only until a model is attached
    pub fn new(store: Arc<dyn RecordStore>, config: DedupConfig) -> Self {
        Self {
            store,
            model: None,
            config,
        }
    }

    pub fn with_model(mut self, model: Option<Arc<dyn TextModel>>) -> Self {
        self.model = model;
        self
    }

    /// Compute a merge plan without writing anything
    pub async fn plan(&self, nodes: &[Node]) -> (MergePlan, usize) {
        let mut plan = MergePlan::heuristic(nodes);
        tracing::info!(
            nodes = nodes.len(),
            canonical = plan.canonical_count(),
            merges = plan.heuristic_merges(),
            "dedup pass 1 (heuristic)"
        );

        let mut failed = 0;
        let Some(model) = &self.model else {
            return (plan, failed);
        };
        if plan.canonical_count() <= self.config.semantic_threshold {
            tracing::debug!(
                canonical = plan.canonical_count(),
                threshold = self.config.semantic_threshold,
                "dedup pass 2 skipped"
            );
            return (plan, failed);
        }

        let lines = plan.entity_lines();
        let mut groups = Vec::new();
        for (i, batch) in lines.chunks(self.config.batch_size.max(1)).enumerate() {
            let prompt = merge_prompt(&batch.join("\n"));
            match model.generate(&prompt, ResponseFormat::Text).await {
                Ok(reply) => match parse_merge_groups(&reply) {
                    Some(found) => {
                        tracing::debug!(batch = i + 1, groups = found.len(), "dedup batch");
                        groups.extend(found);
                    }
                    None => {
                        tracing::warn!(batch = i + 1, "dedup batch reply was not a JSON array");
                        failed += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(batch = i + 1, error = %e, "dedup batch failed, skipping");
                    failed += 1;
                }
            }
        }

        for group in &groups {
            plan.merge_group(group);
        }
        tracing::info!(
            canonical = plan.canonical_count(),
            merges = plan.semantic_merges(),
            failed_batches = failed,
            "dedup pass 2 (semantic)"
        );
        (plan, failed)
    }

    /// Plan and apply a full deduplication
    pub async fn run(&self) -> Result<DedupReport, DedupError> {
        let store = self.store.clone();
        let (nodes, edges) = blocking(move || Ok((store.all_nodes()?, store.all_edges()?))).await?;

        let (plan, failed_batches) = self.plan(&nodes).await;
        let rewrite = plan.rewrite_edges(&edges);
        let changed = plan.changed_nodes(&nodes);
        let removed_nodes = plan.removed_nodes(&nodes);
        let removed_edges = rewrite.removed();
        let deleted_edges = rewrite.deletions();

        let report = DedupReport {
            merged: plan.remap().len(),
            heuristic_merges: plan.heuristic_merges(),
            semantic_merges: plan.semantic_merges(),
            failed_batches,
            removed_nodes: removed_nodes.len(),
            removed_edges: removed_edges.len(),
            rewritten_edges: rewrite.updated.len(),
        };

        self.apply(changed, rewrite.updated, deleted_edges, removed_nodes)
            .await?;
        tracing::info!(?report, "dedup complete");
        Ok(report)
    }

    /// Write in store-sized batches: canonical nodes, then edge deletes
    /// (including retired ids), then retargeted edges, then absorbed nodes.
    async fn apply(
        &self,
        changed: Vec<Node>,
        updated: Vec<Edge>,
        removed_edges: Vec<EdgeId>,
        removed_nodes: Vec<NodeId>,
    ) -> Result<(), DedupError> {
        let store = self.store.clone();
        let batch = self.config.store_batch.max(1);
        blocking(move || {
            for chunk in changed.chunks(batch) {
                store.upsert_nodes(chunk)?;
            }
            for chunk in removed_edges.chunks(batch) {
                store.delete_edges(chunk)?;
            }
            for chunk in updated.chunks(batch) {
                store.upsert_edges(chunk)?;
            }
            for chunk in removed_nodes.chunks(batch) {
                store.delete_nodes(chunk)?;
            }
            Ok(())
        })
        .await
    }
}

/// Run blocking store work off the async executor
async fn blocking<T, F>(f: F) -> Result<T, DedupError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
        .map_err(DedupError::from)
}
