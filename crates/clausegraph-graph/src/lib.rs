pub mod builder;
pub mod graph;
pub mod overlay;
pub mod store;

pub use builder::{ClauseRecord, ContractDocument, DatasetBuilder};
pub use graph::{Adjacency, LabelSummary, Neighborhood, NodeInfo, TrainingGraph};
pub use overlay::CombinedGraph;
pub use store::{ReconcileReport, TrainingGraphStore};
