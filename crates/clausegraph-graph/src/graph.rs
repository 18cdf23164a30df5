use clausegraph_core::{ClauseGraphError, ClauseNode, Label, NodeId, Result, RiskLevel, StructuralEdge};
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::collections::{BTreeMap, BTreeSet};
use std::iter::Copied;
use std::slice::Iter;

/// Read access to an undirected adjacency structure.
///
/// Message passing only needs node count and neighbor enumeration, so both the persisted
/// training graph and the per-query overlay implement this.
pub trait Neighborhood {
    type Neighbors<'a>: Iterator<Item = NodeId>
    where
        Self: 'a;

    fn node_count(&self) -> usize;

    fn neighbors(&self, node: NodeId) -> Self::Neighbors<'_>;

    fn degree(&self, node: NodeId) -> usize {
        self.neighbors(node).count()
    }
}

/// Compressed sparse row adjacency. Every undirected edge appears in both endpoint rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacency {
    offsets: Vec<usize>,
    targets: Vec<NodeId>,
}

impl Adjacency {
    pub fn from_undirected(node_count: usize, edges: &[StructuralEdge]) -> Self {
        let mut degrees = vec![0usize; node_count];
        for edge in edges {
            degrees[edge.src] += 1;
            degrees[edge.dst] += 1;
        }

        let mut offsets = Vec::with_capacity(node_count + 1);
        offsets.push(0);
        for degree in &degrees {
            let last = *offsets.last().unwrap_or(&0);
            offsets.push(last + degree);
        }

        let mut cursor = offsets.clone();
        let mut targets = vec![0; offsets[node_count]];
        for edge in edges {
            targets[cursor[edge.src]] = edge.dst;
            cursor[edge.src] += 1;
            targets[cursor[edge.dst]] = edge.src;
            cursor[edge.dst] += 1;
        }

        Self { offsets, targets }
    }

    pub fn row(&self, node: NodeId) -> &[NodeId] {
        &self.targets[self.offsets[node]..self.offsets[node + 1]]
    }

    /// Directed entries, i.e. twice the undirected edge count.
    pub fn entry_count(&self) -> usize {
        self.targets.len()
    }
}

impl Neighborhood for Adjacency {
    type Neighbors<'a> = Copied<Iter<'a, NodeId>>;

    fn node_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    fn neighbors(&self, node: NodeId) -> Self::Neighbors<'_> {
        self.row(node).iter().copied()
    }

    fn degree(&self, node: NodeId) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }
}

/// Clause metadata kept alongside the feature matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub source_document_id: String,
    pub sequence_index: i64,
    pub text: String,
}

/// Labeled-node statistics used to gate training.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSummary {
    pub labeled: usize,
    pub unlabeled: usize,
    pub class_counts: BTreeMap<RiskLevel, usize>,
}

impl LabelSummary {
    pub fn distinct_classes(&self) -> usize {
        self.class_counts.len()
    }

    /// Largest class index present plus one.
    pub fn num_classes(&self) -> usize {
        self.class_counts
            .keys()
            .next_back()
            .map(|level| level.index() + 1)
            .unwrap_or(0)
    }
}

/// The persisted transductive graph: one row per clause, structural edges, one label per node.
///
/// Node ids are dense (`0..N`) and equal to row indices of the feature matrix.
#[derive(Debug, Clone)]
pub struct TrainingGraph {
    info: Vec<NodeInfo>,
    features: Array2<f32>,
    edges: Vec<StructuralEdge>,
    labels: Vec<Label>,
    adjacency: Adjacency,
}

impl TrainingGraph {
    /// Assemble a graph from the three aligned tables, validating every invariant.
    pub fn from_parts(
        nodes: Vec<ClauseNode>,
        edges: Vec<StructuralEdge>,
        labels: Vec<Label>,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(ClauseGraphError::DataIntegrity(
                "training graph has no nodes".to_string(),
            ));
        }
        if labels.len() != nodes.len() {
            return Err(ClauseGraphError::DataIntegrity(format!(
                "label count ({}) != node count ({})",
                labels.len(),
                nodes.len()
            )));
        }

        let dimension = nodes[0].embedding.len();
        if dimension == 0 {
            return Err(ClauseGraphError::DataIntegrity(
                "node 0 has an empty embedding".to_string(),
            ));
        }

        let node_count = nodes.len();
        let mut flat = Vec::with_capacity(node_count * dimension);
        let mut info = Vec::with_capacity(node_count);
        for (row, node) in nodes.into_iter().enumerate() {
            if node.node_id != row {
                return Err(ClauseGraphError::DataIntegrity(format!(
                    "node ids must be dense and ordered: row {} has id {}",
                    row, node.node_id
                )));
            }
            if node.embedding.len() != dimension {
                return Err(ClauseGraphError::DataIntegrity(format!(
                    "node {} has embedding dimension {}, expected {}",
                    node.node_id,
                    node.embedding.len(),
                    dimension
                )));
            }
            flat.extend_from_slice(&node.embedding);
            info.push(NodeInfo {
                source_document_id: node.source_document_id,
                sequence_index: node.sequence_index,
                text: node.text,
            });
        }

        for edge in &edges {
            if edge.src >= node_count || edge.dst >= node_count {
                return Err(ClauseGraphError::DataIntegrity(format!(
                    "edge ({}, {}) references a node outside 0..{}",
                    edge.src, edge.dst, node_count
                )));
            }
            if edge.src == edge.dst {
                return Err(ClauseGraphError::DataIntegrity(format!(
                    "self-loop on node {}",
                    edge.src
                )));
            }
        }

        let features = Array2::from_shape_vec((node_count, dimension), flat)
            .map_err(|e| ClauseGraphError::DataIntegrity(e.to_string()))?;
        let adjacency = Adjacency::from_undirected(node_count, &edges);

        Ok(Self {
            info,
            features,
            edges,
            labels,
            adjacency,
        })
    }

    pub fn node_count(&self) -> usize {
        self.info.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn dimension(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn embedding(&self, node: NodeId) -> ArrayView1<'_, f32> {
        self.features.row(node)
    }

    /// Row-major embedding buffer, `node_count * dimension` long. The matrix is always built in
    /// standard layout.
    pub fn embedding_buffer(&self) -> &[f32] {
        self.features.as_slice().unwrap_or_default()
    }

    pub fn edges(&self) -> &[StructuralEdge] {
        &self.edges
    }

    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label(&self, node: NodeId) -> Option<Label> {
        self.labels.get(node).copied()
    }

    pub fn info(&self, node: NodeId) -> Option<&NodeInfo> {
        self.info.get(node)
    }

    /// Largest id present; a query node is attached at `max_node_id() + 1`.
    pub fn max_node_id(&self) -> NodeId {
        self.node_count() - 1
    }

    pub fn clause_node(&self, node: NodeId) -> Option<ClauseNode> {
        let info = self.info.get(node)?;
        Some(ClauseNode {
            node_id: node,
            source_document_id: info.source_document_id.clone(),
            sequence_index: info.sequence_index,
            text: info.text.clone(),
            embedding: self.features.row(node).to_vec(),
        })
    }

    pub fn clause_nodes(&self) -> Vec<ClauseNode> {
        (0..self.node_count())
            .filter_map(|id| self.clause_node(id))
            .collect()
    }

    /// Nodes whose label is not UNLABELED.
    pub fn labeled_subset(&self) -> BTreeSet<NodeId> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, label)| label.is_labeled())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn label_summary(&self) -> LabelSummary {
        let mut class_counts = BTreeMap::new();
        let mut labeled = 0;
        for label in &self.labels {
            if let Label::Risk(level) = label {
                labeled += 1;
                *class_counts.entry(*level).or_insert(0) += 1;
            }
        }
        LabelSummary {
            labeled,
            unlabeled: self.labels.len() - labeled,
            class_counts,
        }
    }

    /// Training preconditions: at least two labeled nodes spanning at least two classes.
    pub fn ensure_trainable(&self) -> Result<LabelSummary> {
        let summary = self.label_summary();
        if summary.labeled < 2 {
            return Err(ClauseGraphError::DataIntegrity(format!(
                "need at least 2 labeled nodes to train, found {}",
                summary.labeled
            )));
        }
        if summary.distinct_classes() < 2 {
            return Err(ClauseGraphError::DataIntegrity(format!(
                "need at least 2 distinct label classes among labeled nodes, found {}",
                summary.distinct_classes()
            )));
        }
        Ok(summary)
    }

    /// Replace one label. The only mutation a built graph allows.
    pub fn relabel(&mut self, node: NodeId, label: Label) -> Result<Label> {
        let slot = self
            .labels
            .get_mut(node)
            .ok_or_else(|| ClauseGraphError::NodeNotFound(node.to_string()))?;
        Ok(std::mem::replace(slot, label))
    }
}

impl Neighborhood for TrainingGraph {
    type Neighbors<'a> = Copied<Iter<'a, NodeId>>;

    fn node_count(&self) -> usize {
        self.info.len()
    }

    fn neighbors(&self, node: NodeId) -> Self::Neighbors<'_> {
        self.adjacency.neighbors(node)
    }

    fn degree(&self, node: NodeId) -> usize {
        self.adjacency.degree(node)
    }
}
