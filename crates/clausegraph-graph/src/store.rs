//! On-disk layout of the training graph: three aligned JSON tables keyed by node id.
//!
//! ```text
//! <data_dir>/nodes.json   [{node_id, source_document_id, sequence_index, text, embedding}]
//! <data_dir>/edges.json   [{src, dst}]
//! <data_dir>/labels.json  [{node_id, label}]   label in {-1, 0, 1, 2}
//! ```

use clausegraph_core::{
    ClauseGraphError, ClauseNode, Label, LabelRecord, NodeId, Result, StructuralEdge,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::graph::TrainingGraph;

pub const NODES_FILE: &str = "nodes.json";
pub const EDGES_FILE: &str = "edges.json";
pub const LABELS_FILE: &str = "labels.json";

/// Outcome of [`TrainingGraphStore::reconcile_labels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub preserved: usize,
    pub filled: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingGraphStore {
    root: PathBuf,
}

impl TrainingGraphStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.join(NODES_FILE).exists()
    }

    /// Reconstruct the persisted graph, validating alignment of all three tables.
    pub fn load(&self) -> Result<TrainingGraph> {
        let nodes: Vec<ClauseNode> = self.read_table(NODES_FILE)?;
        let edges: Vec<StructuralEdge> = self.read_table(EDGES_FILE)?;
        let labels_path = self.root.join(LABELS_FILE);
        if !labels_path.exists() {
            return Err(ClauseGraphError::DataIntegrity(format!(
                "{} is missing; reconcile labels before loading",
                labels_path.display()
            )));
        }
        let records: Vec<LabelRecord> = self.read_table(LABELS_FILE)?;

        if records.len() != nodes.len() {
            return Err(ClauseGraphError::DataIntegrity(format!(
                "label count ({}) != node count ({}); check {} alignment",
                records.len(),
                nodes.len(),
                LABELS_FILE
            )));
        }
        let labels = align_labels(&nodes, &records)?;

        let graph = TrainingGraph::from_parts(nodes, edges, labels)?;
        let summary = graph.label_summary();
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            dimension = graph.dimension(),
            labeled = summary.labeled,
            "Loaded training graph from {}",
            self.root.display()
        );
        Ok(graph)
    }

    pub fn save(&self, graph: &TrainingGraph) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        self.write_table(NODES_FILE, &graph.clause_nodes())?;
        self.write_table(EDGES_FILE, graph.edges())?;
        self.write_table(LABELS_FILE, &label_records(graph.labels()))?;
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Saved training graph to {}",
            self.root.display()
        );
        Ok(())
    }

    /// Persist a new label for one node, returning the previous label.
    pub fn relabel(&self, node_id: NodeId, label: Label) -> Result<Label> {
        let mut records: Vec<LabelRecord> = self.read_table(LABELS_FILE)?;
        let record = records
            .iter_mut()
            .find(|r| r.node_id == node_id)
            .ok_or_else(|| ClauseGraphError::NodeNotFound(node_id.to_string()))?;
        let previous = std::mem::replace(&mut record.label, label);
        self.write_table(LABELS_FILE, &records)?;
        info!(node_id, ?previous, ?label, "Relabeled node");
        Ok(previous)
    }

    /// Rebuild the label table keyed by the node table, keeping labels that still match a node
    /// and marking every other node UNLABELED.
    pub fn reconcile_labels(&self) -> Result<ReconcileReport> {
        let nodes: Vec<ClauseNode> = self.read_table(NODES_FILE)?;
        let existing: Vec<LabelRecord> = if self.root.join(LABELS_FILE).exists() {
            self.read_table(LABELS_FILE)?
        } else {
            warn!("{} missing, creating it", LABELS_FILE);
            Vec::new()
        };

        let known: HashMap<NodeId, Label> =
            existing.iter().map(|r| (r.node_id, r.label)).collect();
        let mut report = ReconcileReport {
            preserved: 0,
            filled: 0,
            dropped: 0,
        };
        let records: Vec<LabelRecord> = nodes
            .iter()
            .map(|node| {
                let label = match known.get(&node.node_id) {
                    Some(label) => {
                        report.preserved += 1;
                        *label
                    }
                    None => {
                        report.filled += 1;
                        Label::Unlabeled
                    }
                };
                LabelRecord {
                    node_id: node.node_id,
                    label,
                }
            })
            .collect();
        report.dropped = existing.len().saturating_sub(report.preserved);

        self.write_table(LABELS_FILE, &records)?;
        info!(?report, "Reconciled label table");
        Ok(report)
    }

    fn read_table<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.root.join(name);
        let bytes = std::fs::read(&path).map_err(|e| {
            ClauseGraphError::DataIntegrity(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ClauseGraphError::DataIntegrity(format!("malformed {}: {}", path.display(), e))
        })
    }

    /// Write through a temporary file so readers never observe a half-written table.
    fn write_table<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.root.join(name);
        let tmp = self.root.join(format!(".{name}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec(value)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn label_records(labels: &[Label]) -> Vec<LabelRecord> {
    labels
        .iter()
        .enumerate()
        .map(|(node_id, &label)| LabelRecord { node_id, label })
        .collect()
}

/// Order labels by the node table; every node needs exactly one label row.
fn align_labels(nodes: &[ClauseNode], records: &[LabelRecord]) -> Result<Vec<Label>> {
    let mut by_id: HashMap<NodeId, Label> = HashMap::with_capacity(records.len());
    for record in records {
        if by_id.insert(record.node_id, record.label).is_some() {
            return Err(ClauseGraphError::DataIntegrity(format!(
                "duplicate label row for node {}",
                record.node_id
            )));
        }
    }
    nodes
        .iter()
        .map(|node| {
            by_id.get(&node.node_id).copied().ok_or_else(|| {
                ClauseGraphError::DataIntegrity(format!("node {} has no label row", node.node_id))
            })
        })
        .collect()
}
