pub mod apparatus;
pub mod calibration;
pub mod config;
pub mod error;
pub mod observer;
pub mod plan;
pub mod record;
pub mod state;
pub mod trial;

pub use apparatus::{Apparatus, Flow, MessageWait, TiltResponse, snap_confidence};
pub use calibration::{
    ThresholdEstimate, ThresholdSource, fitted_threshold, manual_override, resolve_threshold,
};
pub use config::{ExperimentConfig, ThresholdFitConfig};
pub use error::{ExperimentError, Result};
pub use observer::{ObserverProfile, SimulatedObserver};
pub use plan::{OFFSETS_7, OFFSETS_9, TrialPlan, TrialPlanner};
pub use record::{
    DebriefStats, DelimitedWriter, HEADER, MemorySink, RecordSink, SessionInfo, SessionOutcome,
    SessionSummary, TrialRecord,
};
pub use state::{ExperimentRunner, RunOutcome, RunReport};
pub use trial::{SequenceBuilder, TrialTimings};
