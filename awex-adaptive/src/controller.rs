use awex_core::{Level, LevelBounds, ResponseRecord};
use serde::{Deserialize, Serialize};

use crate::bayes::{BayesConfig, SequentialBayesEstimator};
use crate::error::Result;
use crate::staircase::{StaircaseConfig, StepStaircase};

/// Trial-by-trial threshold estimator.
///
/// Every `next_level` must be answered by exactly one `add_response` before
/// the next query. Implementations clamp every level they hand out into their
/// bounds.
pub trait AdaptiveController: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Level to test next. Repeated calls without a response return the same level.
    fn next_level(&mut self) -> Result<Level>;

    fn add_response(&mut self, outcome: bool) -> Result<()>;

    fn is_done(&self) -> bool;

    /// Stops the controller; later queries fail and the collected history stays readable.
    fn abort(&mut self);

    fn is_aborted(&self) -> bool;

    /// Current threshold estimate.
    fn threshold(&self) -> Result<Level>;

    fn history(&self) -> &[ResponseRecord];

    fn trials_completed(&self) -> usize {
        self.history().len()
    }

    fn reversals(&self) -> &[Level] {
        &[]
    }
}

/// Strategy selection, as it appears in the experiment configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControllerConfig {
    Staircase(StaircaseConfig),
    Bayes(BayesConfig),
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig::Staircase(StaircaseConfig::default())
    }
}

impl ControllerConfig {
    pub fn build(&self, bounds: LevelBounds) -> Result<Box<dyn AdaptiveController>> {
        Ok(match self {
            ControllerConfig::Staircase(cfg) => Box::new(StepStaircase::new(cfg.clone(), bounds)?),
            ControllerConfig::Bayes(cfg) => {
                Box::new(SequentialBayesEstimator::new(cfg.clone(), bounds)?)
            }
        })
    }

    pub fn n_trials(&self) -> usize {
        match self {
            ControllerConfig::Staircase(cfg) => cfg.n_trials,
            ControllerConfig::Bayes(cfg) => cfg.n_trials,
        }
    }

    /// Snaps the start level to whole frames where the strategy supports it.
    pub fn with_quantum(mut self, frame_ms: f64) -> Self {
        if let ControllerConfig::Staircase(cfg) = &mut self {
            cfg.quantum = Some(frame_ms);
        }
        self
    }

    /// Steps the staircase by whole display frames. The Bayesian grid is unaffected.
    pub fn with_frame_steps(self, frames: u32, frame_ms: f64) -> Self {
        match self {
            ControllerConfig::Staircase(cfg) => {
                ControllerConfig::Staircase(cfg.with_frame_steps(frames, frame_ms))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> LevelBounds {
        LevelBounds::new(7.0, 500.0).unwrap()
    }

    fn drive(controller: &mut dyn AdaptiveController) -> usize {
        let mut asked = 0;
        while !controller.is_done() {
            let level = controller.next_level().unwrap();
            assert!(bounds().contains(level));
            controller.add_response(level > 120.0).unwrap();
            asked += 1;
        }
        asked
    }

    #[test]
    fn both_strategies_run_through_the_same_loop() {
        for config in [
            ControllerConfig::Staircase(StaircaseConfig {
                n_trials: 30,
                ..StaircaseConfig::default()
            }),
            ControllerConfig::Bayes(BayesConfig {
                n_trials: 30,
                ..BayesConfig::default()
            }),
        ] {
            let mut controller = config.build(bounds()).unwrap();
            assert_eq!(drive(controller.as_mut()), 30);
            assert_eq!(controller.trials_completed(), 30);
            let threshold = controller.threshold().unwrap();
            assert!(
                (60.0..=250.0).contains(&threshold),
                "{} threshold {threshold}",
                controller.name()
            );
        }
    }

    #[test]
    fn config_is_tagged_by_kind() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"kind":"bayes","grid_size":21,"n_trials":10}"#).unwrap();
        match config {
            ControllerConfig::Bayes(cfg) => {
                assert_eq!(cfg.grid_size, 21);
                assert_eq!(cfg.n_trials, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        let default: ControllerConfig = serde_json::from_str(r#"{"kind":"staircase"}"#).unwrap();
        assert_eq!(default, ControllerConfig::default());
    }

    #[test]
    fn quantum_only_applies_to_staircase() {
        let stair = ControllerConfig::default().with_quantum(1000.0 / 144.0);
        match stair {
            ControllerConfig::Staircase(cfg) => assert!(cfg.quantum.is_some()),
            _ => unreachable!(),
        }
        let bayes = ControllerConfig::Bayes(BayesConfig::default())
            .with_quantum(8.0)
            .with_frame_steps(1, 8.0);
        assert_eq!(bayes, ControllerConfig::Bayes(BayesConfig::default()));
    }
}
