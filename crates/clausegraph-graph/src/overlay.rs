//! Per-request graph augmentation.
//!
//! A [`CombinedGraph`] borrows the shared [`TrainingGraph`] and layers exactly one query node plus
//! its similarity edges on top of it. The base is never copied or mutated; dropping the overlay
//! discards the query node, its edges and its feature matrix.

use clausegraph_core::{ClauseGraphError, NodeId, Result};
use ndarray::{concatenate, Array2, ArrayView1, ArrayView2, Axis};
use std::iter::{Chain, Copied};
use std::option::IntoIter as OptionIter;
use std::slice::Iter;

use crate::graph::{Neighborhood, TrainingGraph};

pub struct CombinedGraph<'a> {
    base: &'a TrainingGraph,
    query_id: NodeId,
    /// Distinct training nodes joined to the query node, in selection order
    attached: Vec<NodeId>,
    features: Array2<f32>,
}

impl<'a> CombinedGraph<'a> {
    /// Attach `query_embedding` as node `max_id + 1` with one undirected edge per neighbor.
    pub fn attach(
        base: &'a TrainingGraph,
        query_embedding: &[f32],
        neighbors: &[NodeId],
    ) -> Result<Self> {
        if query_embedding.len() != base.dimension() {
            return Err(ClauseGraphError::Configuration(format!(
                "query embedding dimension {} does not match training graph dimension {}",
                query_embedding.len(),
                base.dimension()
            )));
        }

        let mut attached: Vec<NodeId> = Vec::with_capacity(neighbors.len());
        for &node in neighbors {
            if node >= base.node_count() {
                return Err(ClauseGraphError::NodeNotFound(node.to_string()));
            }
            if !attached.contains(&node) {
                attached.push(node);
            }
        }

        let query_row = ArrayView1::from(query_embedding).insert_axis(Axis(0));
        let features = concatenate(Axis(0), &[base.features(), query_row])
            .map_err(|e| ClauseGraphError::Configuration(e.to_string()))?;

        Ok(Self {
            base,
            query_id: base.max_node_id() + 1,
            attached,
            features,
        })
    }

    pub fn base(&self) -> &TrainingGraph {
        self.base
    }

    /// Id of the transient node; always the last feature row.
    pub fn query_id(&self) -> NodeId {
        self.query_id
    }

    pub fn attached(&self) -> &[NodeId] {
        &self.attached
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    /// Structural edges plus one undirected similarity edge per attached neighbor.
    pub fn edge_count(&self) -> usize {
        self.base.edge_count() + self.attached.len()
    }
}

impl<'a> Neighborhood for CombinedGraph<'a> {
    type Neighbors<'b> = Chain<Copied<Iter<'b, NodeId>>, OptionIter<NodeId>>
    where
        Self: 'b;

    fn node_count(&self) -> usize {
        self.base.node_count() + 1
    }

    fn neighbors(&self, node: NodeId) -> Self::Neighbors<'_> {
        if node == self.query_id {
            return self.attached.iter().copied().chain(None);
        }
        let back_edge = self
            .attached
            .contains(&node)
            .then_some(self.query_id);
        self.base.adjacency().row(node).iter().copied().chain(back_edge)
    }
}
