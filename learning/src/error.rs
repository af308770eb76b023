use thiserror::Error;

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("decision store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decision store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
