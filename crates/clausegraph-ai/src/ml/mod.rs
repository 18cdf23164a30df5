//! Graph classifier: network definition, training, persisted weights and inference.

pub mod inference;
pub mod metrics;
pub mod model;
pub mod training;
pub mod weights;

pub use inference::{
    ClassifierSnapshot, GraphClassifier, GraphPrediction, GraphPredictor, ModelHandle,
    DEFAULT_K_NEIGHBORS,
};
pub use metrics::{accuracy, weighted_f1, TrainingMetrics};
pub use model::{mean_aggregate, softmax, GraphSageModel, SageLayer};
pub use training::{
    stratified_split, DataSplit, GraphTrainer, TrainedClassifier, TrainingOptions, TrainingReport,
};
pub use weights::{ClassifierWeights, LayerWeights, WEIGHTS_FORMAT_VERSION};
