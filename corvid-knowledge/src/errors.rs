#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("duplicate item id: {0}")]
    DuplicateId(String),
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("import failed: {0}")]
    Import(String),
    #[error("snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
