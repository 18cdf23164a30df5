use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClauseGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Graph tables are misaligned or the label set cannot support training.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Embedding or generation service failed.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Generative output does not match the risk schema.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored graph and classifier weights disagree.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),
}

impl ClauseGraphError {
    /// Integrity and configuration failures are the only ones allowed to abort a process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClauseGraphError::DataIntegrity(_) | ClauseGraphError::Configuration(_)
        )
    }

    /// Call failures that the hybrid pipeline degrades around instead of surfacing.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            ClauseGraphError::ExternalService(_) | ClauseGraphError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClauseGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ClauseGraphError::DataIntegrity("labels".into()).is_fatal());
        assert!(ClauseGraphError::Configuration("dim".into()).is_fatal());
        assert!(!ClauseGraphError::Validation("keys".into()).is_fatal());
        assert!(ClauseGraphError::Timeout("embed".into()).is_external());
    }
}
