//! Two-layer mean-aggregation message passing network.
//!
//! Each layer computes `h' = h·W_self + mean(h_N)·W_neigh + b`. Layer 1 is followed by ReLU,
//! layer 2 emits raw logits. The same [`GraphSageModel`] serves training (full training graph)
//! and inference (training graph plus one overlay node), so layer shapes and the aggregation
//! rule live in exactly one place.

use clausegraph_core::{ClauseGraphError, Result};
use clausegraph_graph::Neighborhood;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

/// Mean of each node's neighbor rows. A node without neighbors gets the zero vector.
pub fn mean_aggregate<G: Neighborhood + ?Sized>(graph: &G, h: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros(h.raw_dim());
    for node in 0..graph.node_count() {
        let mut row = out.row_mut(node);
        let mut degree = 0usize;
        for neighbor in graph.neighbors(node) {
            row += &h.row(neighbor);
            degree += 1;
        }
        if degree > 0 {
            let scale = 1.0 / degree as f32;
            row.mapv_inplace(|x| x * scale);
        }
    }
    out
}

/// Transpose of [`mean_aggregate`]: routes each node's gradient back to the neighbors it averaged.
pub(crate) fn mean_aggregate_transpose<G: Neighborhood + ?Sized>(
    graph: &G,
    grad: ArrayView2<'_, f32>,
) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros(grad.raw_dim());
    for node in 0..graph.node_count() {
        let degree = graph.degree(node);
        if degree == 0 {
            continue;
        }
        let scale = 1.0 / degree as f32;
        let g = grad.row(node);
        for neighbor in graph.neighbors(node) {
            out.row_mut(neighbor).scaled_add(scale, &g);
        }
    }
    out
}

/// Numerically stable softmax of one logit row.
pub fn softmax(logits: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    let exp = logits.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    exp / sum
}

pub fn softmax_rows(logits: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let probs = softmax(row.view());
        row.assign(&probs);
    }
    out
}

/// Index of the largest entry; the first one wins on ties.
pub fn argmax(values: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq)]
pub struct SageLayer {
    pub w_self: Array2<f32>,
    pub w_neigh: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Parameter gradients of one [`SageLayer`].
#[derive(Debug, Clone)]
pub struct LayerGradients {
    pub w_self: Array2<f32>,
    pub w_neigh: Array2<f32>,
    pub bias: Array1<f32>,
}

impl SageLayer {
    /// Glorot-uniform weights, zero bias.
    pub fn glorot(input_dim: usize, output_dim: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (input_dim + output_dim) as f32).sqrt();
        let mut sample = |rows: usize, cols: usize| {
            Array2::from_shape_fn((rows, cols), |_| rng.random_range(-limit..limit))
        };
        let w_self = sample(input_dim, output_dim);
        let w_neigh = sample(input_dim, output_dim);
        Self {
            w_self,
            w_neigh,
            bias: Array1::zeros(output_dim),
        }
    }

    pub fn from_parts(w_self: Array2<f32>, w_neigh: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if w_self.dim() != w_neigh.dim() || bias.len() != w_self.ncols() {
            return Err(ClauseGraphError::Configuration(format!(
                "inconsistent layer shapes: w_self {:?}, w_neigh {:?}, bias {}",
                w_self.dim(),
                w_neigh.dim(),
                bias.len()
            )));
        }
        Ok(Self {
            w_self,
            w_neigh,
            bias,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.w_self.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.w_self.ncols()
    }

    /// Affine part of the layer given the node inputs and their neighbor means.
    fn apply(&self, h: ArrayView2<'_, f32>, aggregated: ArrayView2<'_, f32>) -> Array2<f32> {
        h.dot(&self.w_self) + aggregated.dot(&self.w_neigh) + &self.bias
    }

    pub fn forward<G: Neighborhood + ?Sized>(&self, graph: &G, h: ArrayView2<'_, f32>) -> Array2<f32> {
        let aggregated = mean_aggregate(graph, h);
        self.apply(h, aggregated.view())
    }

    pub(crate) fn gradients(
        &self,
        input: ArrayView2<'_, f32>,
        aggregated: ArrayView2<'_, f32>,
        d_out: ArrayView2<'_, f32>,
    ) -> LayerGradients {
        LayerGradients {
            w_self: input.t().dot(&d_out),
            w_neigh: aggregated.t().dot(&d_out),
            bias: d_out.sum_axis(Axis(0)),
        }
    }

    pub(crate) fn input_gradient<G: Neighborhood + ?Sized>(
        &self,
        graph: &G,
        d_out: ArrayView2<'_, f32>,
    ) -> Array2<f32> {
        let through_neighbors = d_out.dot(&self.w_neigh.t());
        d_out.dot(&self.w_self.t()) + mean_aggregate_transpose(graph, through_neighbors.view())
    }
}

/// Intermediate tensors of one forward pass, kept for backpropagation.
pub(crate) struct ForwardPass {
    pub aggregated_input: Array2<f32>,
    pub pre_activation: Array2<f32>,
    pub hidden: Array2<f32>,
    pub aggregated_hidden: Array2<f32>,
    pub logits: Array2<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphSageModel {
    conv1: SageLayer,
    conv2: SageLayer,
}

impl GraphSageModel {
    pub fn new(input_dim: usize, hidden_dim: usize, num_classes: usize, rng: &mut StdRng) -> Self {
        Self {
            conv1: SageLayer::glorot(input_dim, hidden_dim, rng),
            conv2: SageLayer::glorot(hidden_dim, num_classes, rng),
        }
    }

    pub fn from_layers(conv1: SageLayer, conv2: SageLayer) -> Result<Self> {
        if conv1.output_dim() != conv2.input_dim() {
            return Err(ClauseGraphError::Configuration(format!(
                "layer 1 outputs {} features but layer 2 expects {}",
                conv1.output_dim(),
                conv2.input_dim()
            )));
        }
        Ok(Self { conv1, conv2 })
    }

    pub fn input_dim(&self) -> usize {
        self.conv1.input_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.conv1.output_dim()
    }

    pub fn num_classes(&self) -> usize {
        self.conv2.output_dim()
    }

    pub fn layers(&self) -> (&SageLayer, &SageLayer) {
        (&self.conv1, &self.conv2)
    }

    pub(crate) fn layers_mut(&mut self) -> (&mut SageLayer, &mut SageLayer) {
        (&mut self.conv1, &mut self.conv2)
    }

    /// Per-node logits, `node_count × num_classes`. Pure: identical inputs give identical output.
    pub fn forward<G: Neighborhood + ?Sized>(
        &self,
        graph: &G,
        features: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        Ok(self.forward_pass(graph, features)?.logits)
    }

    pub(crate) fn forward_pass<G: Neighborhood + ?Sized>(
        &self,
        graph: &G,
        features: ArrayView2<'_, f32>,
    ) -> Result<ForwardPass> {
        if features.ncols() != self.input_dim() {
            return Err(ClauseGraphError::Configuration(format!(
                "feature dimension {} does not match model input dimension {}",
                features.ncols(),
                self.input_dim()
            )));
        }
        if features.nrows() != graph.node_count() {
            return Err(ClauseGraphError::Configuration(format!(
                "{} feature rows for {} graph nodes",
                features.nrows(),
                graph.node_count()
            )));
        }

        let aggregated_input = mean_aggregate(graph, features);
        let pre_activation = self.conv1.apply(features, aggregated_input.view());
        let hidden = pre_activation.mapv(|x| x.max(0.0));
        let aggregated_hidden = mean_aggregate(graph, hidden.view());
        let logits = self.conv2.apply(hidden.view(), aggregated_hidden.view());

        Ok(ForwardPass {
            aggregated_input,
            pre_activation,
            hidden,
            aggregated_hidden,
            logits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use clausegraph_graph::Adjacency;
    use clausegraph_core::StructuralEdge;
    use ndarray::array;
    use rand::SeedableRng;

    fn line(n: usize) -> Adjacency {
        let edges: Vec<StructuralEdge> = (1..n)
            .map(|i| StructuralEdge { src: i - 1, dst: i })
            .collect();
        Adjacency::from_undirected(n, &edges)
    }

    #[test]
    fn isolated_node_aggregates_to_zero() {
        let graph = Adjacency::from_undirected(3, &[StructuralEdge { src: 0, dst: 1 }]);
        let h = array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let agg = mean_aggregate(&graph, h.view());

        assert_eq!(agg.row(0).to_vec(), vec![3.0, 4.0]);
        assert_eq!(agg.row(1).to_vec(), vec![1.0, 2.0]);
        assert_eq!(agg.row(2).to_vec(), vec![0.0, 0.0]);
        assert!(agg.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn aggregate_transpose_matches_adjoint() {
        // <A x, y> == <x, Aᵀ y> for the mean operator.
        let graph = line(4);
        let x = array![[1.0f32], [2.0], [-1.0], [0.5]];
        let y = array![[0.3f32], [-0.7], [1.1], [2.0]];
        let lhs = (&mean_aggregate(&graph, x.view()) * &y).sum();
        let rhs = (&x * &mean_aggregate_transpose(&graph, y.view())).sum();
        assert_relative_eq!(lhs, rhs, epsilon = 1e-5);
    }

    #[test]
    fn forward_shape_is_nodes_by_classes() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = GraphSageModel::new(5, 8, 3, &mut rng);
        let graph = line(6);
        let features = Array2::from_shape_fn((6, 5), |(i, j)| (i * 5 + j) as f32 / 30.0);

        let logits = model.forward(&graph, features.view()).unwrap();
        assert_eq!(logits.dim(), (6, 3));

        let again = model.forward(&graph, features.view()).unwrap();
        assert_eq!(logits, again);
    }

    #[test]
    fn forward_rejects_wrong_feature_width() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = GraphSageModel::new(5, 8, 3, &mut rng);
        let features = Array2::<f32>::zeros((2, 4));
        assert!(matches!(
            model.forward(&line(2), features.view()),
            Err(ClauseGraphError::Configuration(_))
        ));
    }

    #[test]
    fn softmax_is_a_distribution() {
        let probs = softmax(array![1000.0f32, -3.0, 2.5].view());
        assert_relative_eq!(probs.sum(), 1.0, epsilon = 1e-6);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(argmax(probs.view()), 0);

        let uniform = softmax(array![0.0f32, 0.0, 0.0].view());
        assert_relative_eq!(uniform[1], 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = SageLayer::glorot(4, 8, &mut rng);
        let b = SageLayer::glorot(6, 3, &mut rng);
        assert!(GraphSageModel::from_layers(a, b).is_err());
    }
}
