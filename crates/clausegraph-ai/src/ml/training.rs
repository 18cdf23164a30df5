//! Full-batch training of the clause classifier.
//!
//! Every epoch runs the forward pass over the whole training graph (structural edges only) and
//! restricts the cross-entropy loss to the train partition. Gradients are propagated by hand
//! through both layers and applied with Adam.

use clausegraph_core::{ClauseGraphError, NodeId, Result, RiskLevel, TrainingConfig};
use clausegraph_graph::TrainingGraph;
use ndarray::{Array, Array2, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::metrics::{accuracy, weighted_f1, TrainingMetrics};
use super::model::{argmax, softmax_rows, GraphSageModel, LayerGradients, SageLayer};

/// Hyperparameters of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub hidden_dim: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Fraction of each class held out for evaluation
    pub test_ratio: f32,
    pub seed: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            epochs: 40,
            learning_rate: 0.005,
            test_ratio: 0.25,
            seed: 42,
        }
    }
}

impl From<&TrainingConfig> for TrainingOptions {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            hidden_dim: config.hidden_dim,
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            test_ratio: config.test_ratio,
            seed: config.seed,
        }
    }
}

/// Labeled node ids partitioned for training and evaluation, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSplit {
    pub train: Vec<NodeId>,
    pub test: Vec<NodeId>,
}

/// Per-class split: `round(n * test_ratio)` nodes of each class go to test, but at least one node
/// of every class stays in train.
pub fn stratified_split(graph: &TrainingGraph, test_ratio: f32, seed: u64) -> Result<DataSplit> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(ClauseGraphError::Configuration(format!(
            "test_ratio must be in (0, 1), got {test_ratio}"
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for node in graph.labeled_subset() {
        if let Some(class) = graph.label(node).and_then(|l| l.class_index()) {
            by_class.entry(class).or_default().push(node);
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = DataSplit {
        train: Vec::new(),
        test: Vec::new(),
    };
    for (_, mut nodes) in by_class {
        nodes.shuffle(&mut rng);
        let n = nodes.len();
        let n_test = ((n as f32 * test_ratio).round() as usize).min(n.saturating_sub(1));
        split.test.extend_from_slice(&nodes[..n_test]);
        split.train.extend_from_slice(&nodes[n_test..]);
    }
    split.train.sort_unstable();
    split.test.sort_unstable();
    Ok(split)
}

/// Outcome of [`GraphTrainer::train`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub metrics: TrainingMetrics,
    pub num_classes: usize,
    pub class_counts: BTreeMap<RiskLevel, usize>,
    pub loss_history: Vec<f32>,
}

#[derive(Debug)]
pub struct TrainedClassifier {
    pub model: GraphSageModel,
    pub report: TrainingReport,
}

pub struct GraphTrainer {
    options: TrainingOptions,
}

impl GraphTrainer {
    pub fn new(options: TrainingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.options
    }

    /// Train on `graph`. Label diversity and split checks run before the first epoch.
    pub fn train(&self, graph: &TrainingGraph) -> Result<TrainedClassifier> {
        let start = Instant::now();
        let summary = graph.ensure_trainable()?;
        if self.options.hidden_dim == 0 || self.options.epochs == 0 {
            return Err(ClauseGraphError::Configuration(
                "hidden_dim and epochs must be positive".to_string(),
            ));
        }
        let num_classes = summary.num_classes();
        let split = stratified_split(graph, self.options.test_ratio, self.options.seed)?;
        if split.test.is_empty() {
            warn!("Every class is too small to hold out a test node; metrics will be zero");
        }
        info!(
            train = split.train.len(),
            test = split.test.len(),
            num_classes,
            classes = ?summary.class_counts,
            "Starting training"
        );

        let targets = class_targets(graph, &split.train)?;
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut model =
            GraphSageModel::new(graph.dimension(), self.options.hidden_dim, num_classes, &mut rng);
        let mut optimizer = Adam::new(self.options.learning_rate, &model);
        let features = graph.features();
        let mut loss_history = Vec::with_capacity(self.options.epochs);

        for epoch in 1..=self.options.epochs {
            let pass = model.forward_pass(graph, features)?;
            let probs = softmax_rows(pass.logits.view());

            let (loss, d_logits) = cross_entropy(&probs, &split.train, &targets);
            if !loss.is_finite() {
                return Err(ClauseGraphError::Training(format!(
                    "loss diverged at epoch {epoch}"
                )));
            }
            loss_history.push(loss);

            let (conv1, conv2) = model.layers();
            let grads2 = conv2.gradients(pass.hidden.view(), pass.aggregated_hidden.view(), d_logits.view());
            let mut d_hidden = conv2.input_gradient(graph, d_logits.view());
            Zip::from(&mut d_hidden)
                .and(&pass.pre_activation)
                .for_each(|g, &z| {
                    if z <= 0.0 {
                        *g = 0.0;
                    }
                });
            let grads1 = conv1.gradients(features, pass.aggregated_input.view(), d_hidden.view());

            optimizer.step(&mut model, &grads1, &grads2);

            if epoch % 5 == 0 || epoch == self.options.epochs {
                info!("Epoch {epoch:03} | Loss: {loss:.4}");
            } else {
                debug!("Epoch {epoch:03} | Loss: {loss:.4}");
            }
        }

        let (y_true, y_pred) = evaluate(&model, graph, &split.test)?;
        let metrics = TrainingMetrics {
            accuracy: accuracy(&y_true, &y_pred),
            weighted_f1: weighted_f1(&y_true, &y_pred, num_classes),
            train_size: split.train.len(),
            test_size: split.test.len(),
            final_loss: loss_history.last().copied().unwrap_or_default(),
            epochs: self.options.epochs,
        };
        info!(
            accuracy = metrics.accuracy,
            weighted_f1 = metrics.weighted_f1,
            "Training finished in {:?}",
            start.elapsed()
        );

        Ok(TrainedClassifier {
            model,
            report: TrainingReport {
                metrics,
                num_classes,
                class_counts: summary.class_counts,
                loss_history,
            },
        })
    }
}

fn class_targets(graph: &TrainingGraph, nodes: &[NodeId]) -> Result<Vec<usize>> {
    nodes
        .iter()
        .map(|&node| {
            graph
                .label(node)
                .and_then(|l| l.class_index())
                .ok_or_else(|| ClauseGraphError::DataIntegrity(format!("node {node} is unlabeled")))
        })
        .collect()
}

/// Mean cross-entropy over `nodes` and its gradient with respect to every logit.
fn cross_entropy(probs: &Array2<f32>, nodes: &[NodeId], targets: &[usize]) -> (f32, Array2<f32>) {
    let mut grad = Array2::<f32>::zeros(probs.raw_dim());
    if nodes.is_empty() {
        return (0.0, grad);
    }
    let scale = 1.0 / nodes.len() as f32;
    let mut loss = 0.0f32;
    for (&node, &target) in nodes.iter().zip(targets) {
        loss -= probs[[node, target]].max(1e-12).ln();
        let mut row = grad.row_mut(node);
        row.assign(&probs.row(node));
        row[target] -= 1.0;
        row.mapv_inplace(|g| g * scale);
    }
    (loss * scale, grad)
}

fn evaluate(
    model: &GraphSageModel,
    graph: &TrainingGraph,
    nodes: &[NodeId],
) -> Result<(Vec<usize>, Vec<usize>)> {
    let logits = model.forward(graph, graph.features())?;
    let y_true = class_targets(graph, nodes)?;
    let y_pred = nodes.iter().map(|&node| argmax(logits.row(node))).collect();
    Ok((y_true, y_pred))
}

/// First and second moment estimates for one layer.
struct LayerMoments {
    m: LayerGradients,
    v: LayerGradients,
}

impl LayerMoments {
    fn zeros(layer: &SageLayer) -> Self {
        let zeros = || LayerGradients {
            w_self: Array2::zeros(layer.w_self.raw_dim()),
            w_neigh: Array2::zeros(layer.w_neigh.raw_dim()),
            bias: ndarray::Array1::zeros(layer.bias.len()),
        };
        Self {
            m: zeros(),
            v: zeros(),
        }
    }
}

struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    conv1: LayerMoments,
    conv2: LayerMoments,
}

impl Adam {
    fn new(learning_rate: f32, model: &GraphSageModel) -> Self {
        let (conv1, conv2) = model.layers();
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            conv1: LayerMoments::zeros(conv1),
            conv2: LayerMoments::zeros(conv2),
        }
    }

    fn step(&mut self, model: &mut GraphSageModel, grads1: &LayerGradients, grads2: &LayerGradients) {
        self.step += 1;
        let lr = self.learning_rate * (1.0 - self.beta2.powi(self.step)).sqrt()
            / (1.0 - self.beta1.powi(self.step));
        let hyper = (lr, self.beta1, self.beta2, self.epsilon);

        let (conv1, conv2) = model.layers_mut();
        update_layer(conv1, grads1, &mut self.conv1, hyper);
        update_layer(conv2, grads2, &mut self.conv2, hyper);
    }
}

fn update_layer(
    layer: &mut SageLayer,
    grads: &LayerGradients,
    moments: &mut LayerMoments,
    hyper: (f32, f32, f32, f32),
) {
    adam_update(&mut layer.w_self, &grads.w_self, &mut moments.m.w_self, &mut moments.v.w_self, hyper);
    adam_update(&mut layer.w_neigh, &grads.w_neigh, &mut moments.m.w_neigh, &mut moments.v.w_neigh, hyper);
    adam_update(&mut layer.bias, &grads.bias, &mut moments.m.bias, &mut moments.v.bias, hyper);
}

fn adam_update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    (lr, beta1, beta2, epsilon): (f32, f32, f32, f32),
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *p -= lr * *m / (v.sqrt() + epsilon);
        });
}
