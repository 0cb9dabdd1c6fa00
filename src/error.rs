//! Error types for bildam

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output relation already exists: {0}")]
    OutputExists(String),

    #[error("Insufficient points: {kept} kept, {required} required")]
    InsufficientPoints { kept: usize, required: usize },

    #[error("Sample too small: {target} rows sampled for k = {k}")]
    SampleTooSmall { target: usize, k: usize },

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Threshold unavailable: {0}")]
    ThresholdUnavailable(String),

    #[error("Unknown distance metric: {0}")]
    UnknownMetric(String),

    #[error("Unknown init method: {0}")]
    UnknownInitMethod(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Relation not found: {0}")]
    RelationNotFound(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Error::DimensionMismatch(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}
