use chrono::{DateTime, Utc};
use clausegraph_core::{ClauseGraphError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use super::metrics::TrainingMetrics;
use super::model::{GraphSageModel, SageLayer};

pub const WEIGHTS_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    pub w_self: Vec<Vec<f32>>,
    pub w_neigh: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LayerWeights {
    fn from_layer(layer: &SageLayer) -> Self {
        Self {
            w_self: rows(&layer.w_self),
            w_neigh: rows(&layer.w_neigh),
            bias: layer.bias.to_vec(),
        }
    }

    fn to_layer(&self) -> Result<SageLayer> {
        SageLayer::from_parts(
            matrix(&self.w_self)?,
            matrix(&self.w_neigh)?,
            Array1::from_vec(self.bias.clone()),
        )
    }
}

/// Persisted classifier: both layers plus the dimensions they were trained with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierWeights {
    pub format_version: u32,
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_classes: usize,
    pub layers: Vec<LayerWeights>,
    #[serde(default)]
    pub metrics: Option<TrainingMetrics>,
}

impl ClassifierWeights {
    pub fn from_model(model: &GraphSageModel, metrics: Option<TrainingMetrics>) -> Self {
        let (conv1, conv2) = model.layers();
        Self {
            format_version: WEIGHTS_FORMAT_VERSION,
            model_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            input_dim: model.input_dim(),
            hidden_dim: model.hidden_dim(),
            num_classes: model.num_classes(),
            layers: vec![LayerWeights::from_layer(conv1), LayerWeights::from_layer(conv2)],
            metrics,
        }
    }

    /// Rebuild the network, checking the stored dimensions against the stored matrices.
    pub fn to_model(&self) -> Result<GraphSageModel> {
        if self.format_version != WEIGHTS_FORMAT_VERSION {
            return Err(ClauseGraphError::Configuration(format!(
                "unsupported weights format version {}",
                self.format_version
            )));
        }
        let [conv1, conv2] = self.layers.as_slice() else {
            return Err(ClauseGraphError::Configuration(format!(
                "expected 2 layers, found {}",
                self.layers.len()
            )));
        };
        let model = GraphSageModel::from_layers(conv1.to_layer()?, conv2.to_layer()?)?;
        if model.input_dim() != self.input_dim
            || model.hidden_dim() != self.hidden_dim
            || model.num_classes() != self.num_classes
        {
            return Err(ClauseGraphError::Configuration(format!(
                "weights header ({}, {}, {}) disagrees with layer shapes ({}, {}, {})",
                self.input_dim,
                self.hidden_dim,
                self.num_classes,
                model.input_dim(),
                model.hidden_dim(),
                model.num_classes()
            )));
        }
        Ok(model)
    }

    /// Weights trained on one embedding dimension cannot score a graph of another.
    pub fn ensure_input_dim(&self, graph_dimension: usize) -> Result<()> {
        if self.input_dim != graph_dimension {
            return Err(ClauseGraphError::Configuration(format!(
                "classifier weights expect embedding dimension {} but the training graph has {}",
                self.input_dim, graph_dimension
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        info!(model_id = %self.model_id, "Saved classifier weights to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            ClauseGraphError::Configuration(format!(
                "cannot read classifier weights {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ClauseGraphError::Configuration(format!(
                "malformed classifier weights {}: {}",
                path.display(),
                e
            ))
        })
    }
}

fn rows(matrix: &Array2<f32>) -> Vec<Vec<f32>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

fn matrix(rows: &[Vec<f32>]) -> Result<Array2<f32>> {
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(ClauseGraphError::Configuration(
            "ragged weight matrix".to_string(),
        ));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), ncols), flat)
        .map_err(|e| ClauseGraphError::Configuration(e.to_string()))
}
