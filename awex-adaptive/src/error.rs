use thiserror::Error;

/// Misuse of the query/response protocol of an adaptive controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("staircase exhausted")]
    Exhausted,
    #[error("no pending query: add_response must follow next_level")]
    NoPendingQuery,
    #[error("controller was aborted")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdaptiveError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("psychometric fit did not converge: {0}")]
    FitConvergence(String),

    #[error("target probability {p} not reachable below fitted asymptote {asymptote:.3}")]
    UnreachableTarget { p: f64, asymptote: f64 },

    #[error("posterior collapsed to zero mass after {trials} trials")]
    NumericInstability { trials: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, AdaptiveError>;
