use std::path::Path;

use awex_adaptive::{ControllerConfig, FitterConfig};
use awex_core::{KeyMapping, LevelBounds};
use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};
use crate::plan::TrialPlan;
use crate::trial::TrialTimings;

/// Post-hoc psychometric fit over the calibration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdFitConfig {
    pub enabled: bool,
    /// Detection probability the threshold is read at.
    pub target_probability: f64,
    pub fitter: FitterConfig,
    /// Offer the operator a manual threshold even when the fit succeeds.
    pub offer_manual_override: bool,
}

impl Default for ThresholdFitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_probability: 0.75,
            fitter: FitterConfig::default(),
            offer_manual_override: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub practice_trials: usize,
    pub practice_soa_ms: f64,
    pub detection_practice_trials: usize,
    pub detection_catch_probability: f64,
    pub detection_step_ms: f64,
    pub detection_start_ms: f64,
    pub bounds: LevelBounds,
    pub controller: ControllerConfig,
    /// Snap the staircase start level to whole display frames.
    pub quantize_start: bool,
    /// Staircase step in display frames; `None` keeps the configured ms schedule.
    pub calibration_step_frames: Option<u32>,
    pub fit: ThresholdFitConfig,
    pub plan: TrialPlan,
    pub timings: TrialTimings,
    pub keys: KeyMapping,
    pub feedback_ms: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            practice_trials: 10,
            practice_soa_ms: 400.0,
            detection_practice_trials: 20,
            detection_catch_probability: 0.5,
            detection_step_ms: 21.0,
            detection_start_ms: 150.0,
            bounds: LevelBounds::default(),
            controller: ControllerConfig::default(),
            quantize_start: true,
            calibration_step_frames: Some(1),
            fit: ThresholdFitConfig::default(),
            plan: TrialPlan::default(),
            timings: TrialTimings::default(),
            keys: KeyMapping::default(),
            feedback_ms: 500,
        }
    }
}

impl ExperimentConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: ExperimentConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ExperimentError::InvalidConfig(msg));
        if !(0.0..=1.0).contains(&self.detection_catch_probability) {
            return invalid(format!(
                "detection catch probability {} outside [0, 1]",
                self.detection_catch_probability
            ));
        }
        for (name, value) in [
            ("practice_soa_ms", self.practice_soa_ms),
            ("detection_step_ms", self.detection_step_ms),
            ("detection_start_ms", self.detection_start_ms),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if !(self.fit.target_probability > 0.0 && self.fit.target_probability < 1.0) {
            return invalid(format!(
                "fit target probability {} outside (0, 1)",
                self.fit.target_probability
            ));
        }
        if self.calibration_step_frames == Some(0) {
            return invalid("calibration_step_frames must be at least 1".into());
        }
        if !self.keys.is_valid() {
            return invalid("left and right tilt keys must differ".into());
        }
        self.timings.validate()?;
        self.plan.validate()?;
        // builds the controller once to surface its own validation errors
        self.controller.build(self.bounds)?;
        Ok(())
    }
}
