//! Transductive inference: attach the query clause to the training graph and read its logits.
//!
//! The training graph and the classifier weights are published together as one immutable
//! [`ClassifierSnapshot`] behind an [`ArcSwap`]. A request loads the snapshot once, so a concurrent
//! reload can never hand it the old graph with the new weights or the reverse.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use clausegraph_core::{single_line, ClauseGraphError, NodeId, Result, RiskLevel};
use clausegraph_graph::{CombinedGraph, TrainingGraph, TrainingGraphStore};
use clausegraph_vector::{top_k_cosine, EmbeddingProvider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use super::model::{argmax, softmax, GraphSageModel};
use super::weights::ClassifierWeights;

pub const DEFAULT_K_NEIGHBORS: usize = 3;

/// Output of the graph classifier for one clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPrediction {
    pub risk_level: RiskLevel,
    /// Softmax mass of the predicted class
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    /// Training nodes the query was attached to, most similar first
    pub neighbors: Vec<NodeId>,
}

/// A training graph and the weights trained on it.
#[derive(Debug)]
pub struct ClassifierSnapshot {
    graph: TrainingGraph,
    model: GraphSageModel,
    model_id: Option<Uuid>,
}

impl ClassifierSnapshot {
    pub fn new(graph: TrainingGraph, model: GraphSageModel) -> Result<Self> {
        if model.input_dim() != graph.dimension() {
            return Err(ClauseGraphError::Configuration(format!(
                "classifier weights expect embedding dimension {} but the training graph has {}",
                model.input_dim(),
                graph.dimension()
            )));
        }
        Ok(Self {
            graph,
            model,
            model_id: None,
        })
    }

    /// Load the persisted graph and weights. Any dimension disagreement is fatal.
    pub fn load(store: &TrainingGraphStore, weights_path: &Path) -> Result<Self> {
        let graph = store.load()?;
        let weights = ClassifierWeights::load(weights_path)?;
        weights.ensure_input_dim(graph.dimension())?;
        let model = weights.to_model()?;
        let mut snapshot = Self::new(graph, model)?;
        snapshot.model_id = Some(weights.model_id);
        Ok(snapshot)
    }

    pub fn graph(&self) -> &TrainingGraph {
        &self.graph
    }

    pub fn model(&self) -> &GraphSageModel {
        &self.model
    }

    pub fn model_id(&self) -> Option<Uuid> {
        self.model_id
    }

    /// Classify an already embedded clause against this snapshot.
    ///
    /// `k` larger than the training graph attaches every node. The combined graph and all
    /// intermediate tensors are dropped before returning.
    pub fn predict_embedding(&self, query: &[f32], k: usize) -> Result<GraphPrediction> {
        let graph = &self.graph;
        let neighbors = top_k_cosine(query, graph.embedding_buffer(), graph.dimension(), k)?;
        let ids: Vec<NodeId> = neighbors.iter().map(|n| n.node_id).collect();
        debug!(?neighbors, "Selected similarity neighbors");

        let combined = CombinedGraph::attach(graph, query, &ids)?;
        let logits = self.model.forward(&combined, combined.features())?;
        let probabilities = softmax(logits.row(combined.query_id()));
        let class = argmax(probabilities.view());
        let risk_level = RiskLevel::from_index(class).ok_or_else(|| {
            ClauseGraphError::Configuration(format!("classifier produced unknown class {class}"))
        })?;

        Ok(GraphPrediction {
            risk_level,
            confidence: probabilities[class],
            probabilities: probabilities.to_vec(),
            neighbors: ids,
        })
    }
}

/// Shared, atomically replaceable classifier state.
pub struct ModelHandle {
    current: ArcSwap<ClassifierSnapshot>,
    reload_lock: Mutex<()>,
}

impl ModelHandle {
    pub fn new(snapshot: ClassifierSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn load(store: &TrainingGraphStore, weights_path: &Path) -> Result<Self> {
        Ok(Self::new(ClassifierSnapshot::load(store, weights_path)?))
    }

    pub fn snapshot(&self) -> Arc<ClassifierSnapshot> {
        self.current.load_full()
    }

    /// Publish a new snapshot; in-flight requests keep the one they already hold.
    pub fn swap(&self, snapshot: ClassifierSnapshot) -> Arc<ClassifierSnapshot> {
        self.current.swap(Arc::new(snapshot))
    }

    /// Re-read graph and weights from disk. On failure the current snapshot stays active.
    pub fn reload(&self, store: &TrainingGraphStore, weights_path: &Path) -> Result<()> {
        let _guard = self.reload_lock.lock();
        let snapshot = ClassifierSnapshot::load(store, weights_path)?;
        let model_id = snapshot.model_id();
        self.swap(snapshot);
        info!(?model_id, "Reloaded classifier snapshot");
        Ok(())
    }
}

/// Graph stage of the hybrid pipeline.
#[async_trait]
pub trait GraphPredictor: Send + Sync {
    async fn predict(&self, text: &str) -> Result<GraphPrediction>;
}

/// Embeds the clause and classifies it against the current snapshot.
pub struct GraphClassifier {
    embedder: Arc<dyn EmbeddingProvider>,
    handle: Arc<ModelHandle>,
    k_neighbors: usize,
    embed_timeout: Duration,
}

impl GraphClassifier {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, handle: Arc<ModelHandle>) -> Self {
        Self {
            embedder,
            handle,
            k_neighbors: DEFAULT_K_NEIGHBORS,
            embed_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_k_neighbors(mut self, k: usize) -> Self {
        self.k_neighbors = k;
        self
    }

    pub fn with_embed_timeout(mut self, embed_timeout: Duration) -> Self {
        self.embed_timeout = embed_timeout;
        self
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        timeout(self.embed_timeout, self.embedder.embed(text))
            .await
            .map_err(|_| {
                ClauseGraphError::Timeout(format!(
                    "{} embedding timed out after {:?}",
                    self.embedder.provider_name(),
                    self.embed_timeout
                ))
            })?
    }
}

#[async_trait]
impl GraphPredictor for GraphClassifier {
    async fn predict(&self, text: &str) -> Result<GraphPrediction> {
        let start = Instant::now();
        let query = self.embed(&single_line(text)).await?;
        let snapshot = self.handle.snapshot();
        let prediction = snapshot.predict_embedding(&query, self.k_neighbors)?;
        debug!(
            risk_level = %prediction.risk_level,
            confidence = prediction.confidence,
            "Graph prediction in {:?}",
            start.elapsed()
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use clausegraph_core::{ClauseNode, Label, StructuralEdge};
    use clausegraph_graph::Neighborhood;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn graph() -> TrainingGraph {
        let embeddings = [
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let nodes = embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| ClauseNode {
                node_id: i,
                source_document_id: "a.json".into(),
                sequence_index: i as i64,
                text: format!("clause {i}"),
                embedding: e.clone(),
            })
            .collect();
        let edges = vec![StructuralEdge { src: 0, dst: 1 }, StructuralEdge { src: 2, dst: 3 }];
        let labels = vec![
            Label::Risk(RiskLevel::Low),
            Label::Unlabeled,
            Label::Risk(RiskLevel::High),
            Label::Risk(RiskLevel::Medium),
        ];
        TrainingGraph::from_parts(nodes, edges, labels).unwrap()
    }

    fn snapshot() -> ClassifierSnapshot {
        let model = GraphSageModel::new(3, 8, 3, &mut StdRng::seed_from_u64(42));
        ClassifierSnapshot::new(graph(), model).unwrap()
    }

    #[test]
    fn prediction_is_a_distribution_over_classes() {
        let snapshot = snapshot();
        let prediction = snapshot.predict_embedding(&[1.0, 0.05, 0.0], 2).unwrap();

        assert_eq!(prediction.probabilities.len(), 3);
        assert_relative_eq!(prediction.probabilities.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
        assert_eq!(prediction.neighbors, vec![0, 1]);
        assert_eq!(
            prediction.confidence,
            prediction.probabilities[prediction.risk_level.index()]
        );
    }

    #[test]
    fn oversized_k_attaches_every_node() {
        let prediction = snapshot().predict_embedding(&[0.2, 0.2, 0.2], 50).unwrap();
        assert_eq!(prediction.neighbors.len(), 4);
    }

    #[test]
    fn inference_leaves_training_graph_untouched() {
        let snapshot = snapshot();
        let (nodes, edges) = (snapshot.graph().node_count(), snapshot.graph().edge_count());
        let first = snapshot.predict_embedding(&[0.0, 1.0, 0.2], 3).unwrap();
        let second = snapshot.predict_embedding(&[0.0, 1.0, 0.2], 3).unwrap();

        assert_eq!(first, second);
        assert_eq!(snapshot.graph().node_count(), nodes);
        assert_eq!(snapshot.graph().edge_count(), edges);
        assert_eq!(snapshot.graph().neighbors(0).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn mismatched_dimensions_are_configuration_errors() {
        let model = GraphSageModel::new(5, 8, 3, &mut StdRng::seed_from_u64(42));
        assert!(matches!(
            ClassifierSnapshot::new(graph(), model),
            Err(ClauseGraphError::Configuration(_))
        ));
        assert!(matches!(
            snapshot().predict_embedding(&[1.0, 0.0], 3),
            Err(ClauseGraphError::Configuration(_))
        ));
    }

    #[test]
    fn swap_replaces_snapshot_atomically() {
        let handle = ModelHandle::new(snapshot());
        let held = handle.snapshot();
        let replacement = GraphSageModel::new(3, 4, 3, &mut StdRng::seed_from_u64(1));
        handle.swap(ClassifierSnapshot::new(graph(), replacement).unwrap());

        assert_eq!(held.model().hidden_dim(), 8);
        assert_eq!(handle.snapshot().model().hidden_dim(), 4);
    }
}
