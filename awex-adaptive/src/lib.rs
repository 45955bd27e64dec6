//! Adaptive threshold estimation: an n-up/n-down staircase, a Bayesian
//! sequential estimator, and an offline logistic fit over the collected
//! responses.

pub mod bayes;
pub mod controller;
pub mod error;
pub mod fit;
pub mod staircase;

pub use bayes::{BayesConfig, Placement, Prior, PsychometricModel, SequentialBayesEstimator};
pub use controller::{AdaptiveController, ControllerConfig};
pub use error::{AdaptiveError, ProtocolViolation, Result};
pub use fit::{FitResult, FitSample, FitterConfig, PsychometricFitter};
pub use staircase::{Direction, ReversalSummary, StaircaseConfig, StepStaircase};
