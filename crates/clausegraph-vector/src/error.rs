use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {0}, got {1}")]
    DimensionMismatch(usize, usize),

    #[error("Vector is empty")]
    EmptyVector,

    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl From<VectorError> for clausegraph_core::ClauseGraphError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::Embedding(msg) => clausegraph_core::ClauseGraphError::ExternalService(msg),
            other => clausegraph_core::ClauseGraphError::Configuration(other.to_string()),
        }
    }
}
