use async_trait::async_trait;
use clausegraph_ai::ml::{
    ClassifierWeights, GraphClassifier, GraphPredictor, GraphTrainer, ModelHandle, TrainingOptions,
};
use clausegraph_core::{
    ClauseGraphError, ClauseNode, Label, Result, RiskLevel, StructuralEdge,
};
use clausegraph_graph::{TrainingGraph, TrainingGraphStore};
use clausegraph_vector::EmbeddingProvider;
use std::sync::Arc;
use tempfile::TempDir;

/// Maps clauses mentioning termination to one axis and everything else to another.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let termination = lower.matches("terminat").count() as f32;
        let payment = lower.matches("pay").count() as f32;
        Ok(vec![termination + 0.1, payment + 0.1, 0.1])
    }

    fn embedding_dimension(&self) -> usize {
        3
    }

    fn provider_name(&self) -> &str {
        "keyword"
    }
}

fn labeled_graph(dimension: usize) -> TrainingGraph {
    let mut nodes = Vec::new();
    let mut labels = Vec::new();
    for i in 0..12 {
        let mut embedding = vec![0.1; dimension];
        let high = i % 2 == 0;
        embedding[if high { 0 } else { 1 }] = 1.0 + i as f32 * 0.02;
        nodes.push(ClauseNode {
            node_id: i,
            source_document_id: format!("contract_{}.json", i / 4),
            sequence_index: (i % 4) as i64,
            text: format!("clause {i}"),
            embedding,
        });
        labels.push(Label::Risk(if high { RiskLevel::High } else { RiskLevel::Low }));
    }
    // Two unlabeled clauses take part in message passing only.
    for i in 12..14 {
        nodes.push(ClauseNode {
            node_id: i,
            source_document_id: "contract_3.json".to_string(),
            sequence_index: (i - 12) as i64,
            text: format!("clause {i}"),
            embedding: vec![0.5; dimension],
        });
        labels.push(Label::Unlabeled);
    }
    let edges = vec![
        StructuralEdge { src: 0, dst: 2 },
        StructuralEdge { src: 1, dst: 3 },
        StructuralEdge { src: 12, dst: 13 },
    ];
    TrainingGraph::from_parts(nodes, edges, labels).unwrap()
}

fn options() -> TrainingOptions {
    TrainingOptions {
        hidden_dim: 16,
        epochs: 80,
        learning_rate: 0.05,
        ..Default::default()
    }
}

fn train_and_persist(dir: &TempDir) -> (TrainingGraphStore, std::path::PathBuf) {
    let store = TrainingGraphStore::new(dir.path());
    let graph = labeled_graph(3);
    store.save(&graph).unwrap();

    let trained = GraphTrainer::new(options()).train(&graph).unwrap();
    let weights_path = dir.path().join("gnn_model.json");
    ClassifierWeights::from_model(&trained.model, Some(trained.report.metrics.clone()))
        .save(&weights_path)
        .unwrap();
    (store, weights_path)
}

#[tokio::test]
async fn trained_classifier_scores_new_clauses() {
    let dir = TempDir::new().unwrap();
    let (store, weights_path) = train_and_persist(&dir);

    let handle = Arc::new(ModelHandle::load(&store, &weights_path).unwrap());
    let classifier = GraphClassifier::new(Arc::new(KeywordEmbedder), handle.clone());

    let prediction = classifier
        .predict("Either party may terminate this agreement with only 3 days of notice.")
        .await
        .unwrap();
    assert_eq!(prediction.risk_level, RiskLevel::High);
    assert_eq!(prediction.probabilities.len(), 3);
    assert_eq!(prediction.neighbors.len(), 3);
    assert!((prediction.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-5);

    // The shared graph is unchanged by inference.
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.graph().node_count(), 14);
    assert_eq!(snapshot.graph().edge_count(), 3);
}

#[tokio::test]
async fn weights_for_another_dimension_fail_to_load() {
    let dir = TempDir::new().unwrap();
    let store = TrainingGraphStore::new(dir.path());
    store.save(&labeled_graph(3)).unwrap();

    let wide = labeled_graph(5);
    let trained = GraphTrainer::new(TrainingOptions {
        epochs: 2,
        ..options()
    })
    .train(&wide)
    .unwrap();
    let weights_path = dir.path().join("gnn_model.json");
    ClassifierWeights::from_model(&trained.model, None)
        .save(&weights_path)
        .unwrap();

    assert!(matches!(
        ModelHandle::load(&store, &weights_path),
        Err(ClauseGraphError::Configuration(_))
    ));
}

#[tokio::test]
async fn reload_swaps_in_retrained_weights() {
    let dir = TempDir::new().unwrap();
    let (store, weights_path) = train_and_persist(&dir);
    let handle = ModelHandle::load(&store, &weights_path).unwrap();
    let before = handle.snapshot();

    store.relabel(12, Label::Risk(RiskLevel::Medium)).unwrap();
    let graph = store.load().unwrap();
    let retrained = GraphTrainer::new(options()).train(&graph).unwrap();
    ClassifierWeights::from_model(&retrained.model, None)
        .save(&weights_path)
        .unwrap();

    handle.reload(&store, &weights_path).unwrap();
    let after = handle.snapshot();
    assert_ne!(before.model_id(), after.model_id());
    assert_eq!(after.graph().label(12), Some(Label::Risk(RiskLevel::Medium)));
    // The old snapshot held by an in-flight request stays intact.
    assert_eq!(before.graph().label(12), Some(Label::Unlabeled));
}

#[tokio::test]
async fn misaligned_label_table_blocks_loading_for_training() {
    let dir = TempDir::new().unwrap();
    let store = TrainingGraphStore::new(dir.path());
    store.save(&labeled_graph(3)).unwrap();
    std::fs::write(dir.path().join("labels.json"), r#"[{"node_id":0,"label":2}]"#).unwrap();

    assert!(matches!(store.load(), Err(ClauseGraphError::DataIntegrity(_))));
}
