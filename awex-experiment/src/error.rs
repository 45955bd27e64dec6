use awex_adaptive::AdaptiveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Adaptive(#[from] AdaptiveError),

    #[error("invalid trial plan: {0}")]
    InvalidPlan(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no usable threshold: {0}")]
    NoThreshold(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExperimentError>;
