//! Rule-based n-up/n-down staircase.
//!
//! The level steps down after `n_down` consecutive successes and up after
//! `n_up` consecutive failures. A change of step direction is a reversal;
//! the step size is taken from `step_sizes` indexed by the number of
//! reversals so far, so `[40.0, 20.0, 10.0]` gives a coarse-to-fine schedule.

use awex_core::{Level, LevelBounds, ResponseRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::controller::AdaptiveController;
use crate::error::{AdaptiveError, ProtocolViolation, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalSummary {
    Mean,
    Median,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaircaseConfig {
    pub start_level: Level,
    pub step_sizes: Vec<Level>,
    pub n_up: u32,
    pub n_down: u32,
    pub n_trials: usize,
    /// How many of the final reversals feed the threshold.
    pub reversals_for_threshold: usize,
    pub summary: ReversalSummary,
    /// Snap the start level to whole multiples of this (a frame duration).
    pub quantum: Option<Level>,
}

/// One frame at 60 Hz.
const DEFAULT_STEP_MS: Level = 1000.0 / 60.0;

/// 1-up/3-down from 150 ms in single-frame steps, converging near 79 % detection.
impl Default for StaircaseConfig {
    fn default() -> Self {
        Self {
            start_level: 150.0,
            step_sizes: vec![DEFAULT_STEP_MS],
            n_up: 1,
            n_down: 3,
            n_trials: 50,
            reversals_for_threshold: 6,
            summary: ReversalSummary::Mean,
            quantum: None,
        }
    }
}

impl StaircaseConfig {
    /// Replaces the step schedule with a single step of `frames` display frames.
    pub fn with_frame_steps(mut self, frames: u32, frame_ms: f64) -> Self {
        self.step_sizes = vec![f64::from(frames) * frame_ms];
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AdaptiveError::InvalidConfig(msg));
        if !self.start_level.is_finite() {
            return invalid(format!("start level {} is not finite", self.start_level));
        }
        if self.step_sizes.is_empty() {
            return invalid("step size schedule is empty".into());
        }
        if let Some(bad) = self.step_sizes.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return invalid(format!("step size {bad} must be positive"));
        }
        if self.n_up == 0 || self.n_down == 0 {
            return invalid("n_up and n_down must be at least 1".into());
        }
        if self.n_trials == 0 {
            return invalid("staircase needs at least one trial".into());
        }
        if self.reversals_for_threshold == 0 {
            return invalid("reversals_for_threshold must be at least 1".into());
        }
        if let Some(q) = self.quantum {
            if !(q.is_finite() && q > 0.0) {
                return invalid(format!("quantum {q} must be positive"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct StepStaircase {
    config: StaircaseConfig,
    bounds: LevelBounds,
    current_level: Level,
    success_run: u32,
    failure_run: u32,
    last_direction: Option<Direction>,
    reversal_levels: Vec<Level>,
    trials_remaining: usize,
    pending: bool,
    aborted: bool,
    history: Vec<ResponseRecord>,
}

impl StepStaircase {
    pub fn new(config: StaircaseConfig, bounds: LevelBounds) -> Result<Self> {
        config.validate()?;
        let start = match config.quantum {
            Some(q) => (config.start_level / q).round() * q,
            None => config.start_level,
        };
        let current_level = bounds.clamp(start);
        info!(
            start = current_level,
            n_up = config.n_up,
            n_down = config.n_down,
            trials = config.n_trials,
            "staircase created"
        );
        Ok(Self {
            trials_remaining: config.n_trials,
            config,
            bounds,
            current_level,
            success_run: 0,
            failure_run: 0,
            last_direction: None,
            reversal_levels: Vec::new(),
            pending: false,
            aborted: false,
            history: Vec::new(),
        })
    }

    pub fn current_level(&self) -> Level {
        self.current_level
    }

    pub fn trials_remaining(&self) -> usize {
        self.trials_remaining
    }

    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    fn active_step(&self) -> Level {
        let idx = self
            .reversal_levels
            .len()
            .min(self.config.step_sizes.len() - 1);
        self.config.step_sizes[idx]
    }

    fn step(&mut self, direction: Direction) {
        if self.last_direction.is_some_and(|d| d != direction) {
            self.reversal_levels.push(self.current_level);
            debug!(
                level = self.current_level,
                count = self.reversal_levels.len(),
                "reversal"
            );
        }
        self.last_direction = Some(direction);
        let step = self.active_step();
        let target = match direction {
            Direction::Up => self.current_level + step,
            Direction::Down => self.current_level - step,
        };
        self.current_level = self.bounds.clamp(target);
        self.success_run = 0;
        self.failure_run = 0;
    }
}

impl AdaptiveController for StepStaircase {
    fn name(&self) -> &'static str {
        "staircase"
    }

    fn next_level(&mut self) -> Result<Level> {
        if self.aborted {
            return Err(ProtocolViolation::Aborted.into());
        }
        if self.trials_remaining == 0 {
            return Err(ProtocolViolation::Exhausted.into());
        }
        self.pending = true;
        Ok(self.current_level)
    }

    fn add_response(&mut self, outcome: bool) -> Result<()> {
        if self.aborted {
            return Err(ProtocolViolation::Aborted.into());
        }
        if self.trials_remaining == 0 {
            return Err(ProtocolViolation::Exhausted.into());
        }
        if !self.pending {
            return Err(ProtocolViolation::NoPendingQuery.into());
        }
        self.pending = false;
        self.trials_remaining -= 1;
        self.history
            .push(ResponseRecord::new(self.current_level, outcome));

        if outcome {
            self.success_run += 1;
            self.failure_run = 0;
            if self.success_run >= self.config.n_down {
                self.step(Direction::Down);
            }
        } else {
            self.failure_run += 1;
            self.success_run = 0;
            if self.failure_run >= self.config.n_up {
                self.step(Direction::Up);
            }
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.aborted || self.trials_remaining == 0
    }

    fn abort(&mut self) {
        if !self.aborted {
            info!(completed = self.history.len(), "staircase aborted");
        }
        self.aborted = true;
        self.pending = false;
    }

    fn is_aborted(&self) -> bool {
        self.aborted
    }

    fn threshold(&self) -> Result<Level> {
        if self.reversal_levels.is_empty() {
            return Ok(self
                .history
                .last()
                .map_or(self.current_level, |r| r.level));
        }
        let n = self.config.reversals_for_threshold;
        let tail = &self.reversal_levels[self.reversal_levels.len().saturating_sub(n)..];
        Ok(match self.config.summary {
            ReversalSummary::Mean => tail.iter().sum::<f64>() / tail.len() as f64,
            ReversalSummary::Median => median(tail),
        })
    }

    fn history(&self) -> &[ResponseRecord] {
        &self.history
    }

    fn reversals(&self) -> &[Level] {
        &self.reversal_levels
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bounds() -> LevelBounds {
        LevelBounds::new(7.0, 500.0).unwrap()
    }

    fn staircase(config: StaircaseConfig) -> StepStaircase {
        StepStaircase::new(config, bounds()).unwrap()
    }

    fn respond(s: &mut StepStaircase, outcome: bool) -> Level {
        s.next_level().unwrap();
        s.add_response(outcome).unwrap();
        s.current_level()
    }

    #[test]
    fn next_level_is_idempotent() {
        let mut s = staircase(StaircaseConfig {
            step_sizes: vec![21.0],
            n_down: 1,
            ..StaircaseConfig::default()
        });
        assert_eq!(s.next_level().unwrap(), 150.0);
        assert_eq!(s.next_level().unwrap(), 150.0);
        s.add_response(true).unwrap();
        assert_eq!(s.next_level().unwrap(), 129.0);
    }

    #[test]
    fn default_is_one_up_three_down() {
        let mut s = staircase(StaircaseConfig::default());
        assert_eq!(respond(&mut s, true), 150.0);
        assert_eq!(respond(&mut s, true), 150.0);
        let down = respond(&mut s, true);
        assert!((down - (150.0 - 1000.0 / 60.0)).abs() < 1e-9);
        assert!((respond(&mut s, false) - 150.0).abs() < 1e-9);
        assert_eq!(s.reversals(), &[down]);
    }

    #[test]
    fn frame_steps_replace_the_schedule() {
        let frame = 1000.0 / 144.0;
        let config = StaircaseConfig {
            step_sizes: vec![40.0, 20.0],
            quantum: Some(frame),
            ..StaircaseConfig::default()
        }
        .with_frame_steps(1, frame);
        assert_eq!(config.step_sizes, vec![frame]);

        let mut s = staircase(config);
        let start = s.current_level();
        for _ in 0..3 {
            respond(&mut s, true);
        }
        assert!((start - s.current_level() - frame).abs() < 1e-9);
        let frames = s.current_level() / frame;
        assert!((frames - frames.round()).abs() < 1e-9);
    }

    #[test]
    fn alternating_responses_reverse_every_trial() {
        let trials = 12;
        let mut s = staircase(StaircaseConfig {
            start_level: 100.0,
            step_sizes: vec![10.0],
            n_down: 1,
            n_trials: trials,
            ..StaircaseConfig::default()
        });
        for i in 0..trials {
            respond(&mut s, i % 2 == 0);
        }
        assert!(s.is_done());
        assert_eq!(s.reversals().len(), trials - 1);
        assert!(s.reversals().iter().all(|&l| l == 90.0 || l == 100.0));
    }

    #[test]
    fn two_down_one_up_waits_for_consecutive_successes() {
        let mut s = staircase(StaircaseConfig {
            start_level: 100.0,
            step_sizes: vec![10.0],
            n_down: 2,
            ..StaircaseConfig::default()
        });
        assert_eq!(respond(&mut s, true), 100.0);
        assert_eq!(respond(&mut s, true), 90.0);
        assert_eq!(respond(&mut s, true), 90.0);
        // a failure resets the success run
        assert_eq!(respond(&mut s, false), 100.0);
        assert_eq!(respond(&mut s, true), 100.0);
        assert_eq!(respond(&mut s, true), 90.0);
        assert_eq!(s.reversals(), &[90.0, 100.0]);
    }

    #[test]
    fn step_schedule_shrinks_after_reversals() {
        let mut s = staircase(StaircaseConfig {
            start_level: 200.0,
            step_sizes: vec![40.0, 20.0, 10.0],
            n_down: 1,
            ..StaircaseConfig::default()
        });
        assert_eq!(respond(&mut s, true), 160.0);
        // first reversal: step drops to 20
        assert_eq!(respond(&mut s, false), 180.0);
        // second reversal: step drops to 10
        assert_eq!(respond(&mut s, true), 170.0);
        // schedule exhausted, last step reused
        assert_eq!(respond(&mut s, false), 180.0);
        assert_eq!(respond(&mut s, false), 190.0);
    }

    #[test]
    fn clamps_at_bounds_without_reversing() {
        let mut s = staircase(StaircaseConfig {
            start_level: 20.0,
            step_sizes: vec![21.0],
            n_down: 1,
            ..StaircaseConfig::default()
        });
        assert_eq!(respond(&mut s, true), 7.0);
        assert_eq!(respond(&mut s, true), 7.0);
        assert!(s.reversals().is_empty());
        assert_eq!(respond(&mut s, false), 28.0);
        assert_eq!(s.reversals(), &[7.0]);
    }

    #[test]
    fn threshold_uses_last_reversals() {
        let mut s = staircase(StaircaseConfig {
            start_level: 100.0,
            step_sizes: vec![10.0],
            n_down: 1,
            reversals_for_threshold: 2,
            n_trials: 20,
            ..StaircaseConfig::default()
        });
        // 100 -> 90 -> 80 (rev at 80 going up) -> 90 (rev at 90 going down) -> 80
        for outcome in [true, true, false, true] {
            respond(&mut s, outcome);
        }
        assert_eq!(s.reversals(), &[80.0, 90.0]);
        assert_eq!(s.threshold().unwrap(), 85.0);
    }

    #[test]
    fn threshold_without_reversals_falls_back_to_last_tested() {
        let mut s = staircase(StaircaseConfig {
            step_sizes: vec![21.0],
            n_down: 1,
            ..StaircaseConfig::default()
        });
        assert_eq!(s.threshold().unwrap(), 150.0);
        respond(&mut s, true);
        respond(&mut s, true);
        assert_eq!(s.threshold().unwrap(), 129.0);
    }

    #[test]
    fn median_summary() {
        let mut s = staircase(StaircaseConfig {
            start_level: 100.0,
            step_sizes: vec![10.0, 5.0],
            n_down: 1,
            summary: ReversalSummary::Median,
            ..StaircaseConfig::default()
        });
        for outcome in [true, false, true, false] {
            respond(&mut s, outcome);
        }
        // reversals at 90, 95, 90
        assert_eq!(s.reversals(), &[90.0, 95.0, 90.0]);
        assert_eq!(s.threshold().unwrap(), 90.0);
    }

    #[test]
    fn quantum_snaps_start_level() {
        let frame = 1000.0 / 144.0;
        let s = staircase(StaircaseConfig {
            quantum: Some(frame),
            ..StaircaseConfig::default()
        });
        let frames = s.current_level() / frame;
        assert!((frames - frames.round()).abs() < 1e-9);
        assert!((s.current_level() - 152.777).abs() < 0.01);
    }

    #[test]
    fn protocol_misuse_is_rejected() {
        let mut s = staircase(StaircaseConfig {
            n_trials: 1,
            ..StaircaseConfig::default()
        });
        assert_eq!(
            s.add_response(true),
            Err(AdaptiveError::Protocol(ProtocolViolation::NoPendingQuery))
        );
        s.next_level().unwrap();
        s.add_response(true).unwrap();
        assert!(s.is_done());
        assert_eq!(
            s.add_response(true),
            Err(AdaptiveError::Protocol(ProtocolViolation::Exhausted))
        );
        assert_eq!(
            s.next_level(),
            Err(AdaptiveError::Protocol(ProtocolViolation::Exhausted))
        );
    }

    #[test]
    fn double_response_is_rejected() {
        let mut s = staircase(StaircaseConfig::default());
        s.next_level().unwrap();
        s.add_response(false).unwrap();
        assert_eq!(
            s.add_response(false),
            Err(AdaptiveError::Protocol(ProtocolViolation::NoPendingQuery))
        );
    }

    #[test]
    fn abort_marks_terminal_and_keeps_history() {
        let mut s = staircase(StaircaseConfig::default());
        respond(&mut s, true);
        s.next_level().unwrap();
        s.abort();
        assert!(s.is_done());
        assert!(s.is_aborted());
        assert_eq!(
            s.next_level(),
            Err(AdaptiveError::Protocol(ProtocolViolation::Aborted))
        );
        assert_eq!(s.history().len(), 1);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        for config in [
            StaircaseConfig {
                step_sizes: vec![],
                ..StaircaseConfig::default()
            },
            StaircaseConfig {
                step_sizes: vec![10.0, -1.0],
                ..StaircaseConfig::default()
            },
            StaircaseConfig {
                n_down: 0,
                ..StaircaseConfig::default()
            },
            StaircaseConfig {
                n_trials: 0,
                ..StaircaseConfig::default()
            },
            StaircaseConfig {
                quantum: Some(0.0),
                ..StaircaseConfig::default()
            },
        ] {
            assert!(matches!(
                StepStaircase::new(config, bounds()),
                Err(AdaptiveError::InvalidConfig(_))
            ));
        }
    }

    proptest! {
        #[test]
        fn level_always_within_bounds(
            start in 0.0f64..800.0,
            step in 1.0f64..120.0,
            n_up in 1u32..4,
            n_down in 1u32..4,
            outcomes in proptest::collection::vec(any::<bool>(), 1..120),
        ) {
            let mut s = staircase(StaircaseConfig {
                start_level: start,
                step_sizes: vec![step],
                n_up,
                n_down,
                n_trials: outcomes.len(),
                ..StaircaseConfig::default()
            });
            for outcome in outcomes {
                let level = s.next_level().unwrap();
                prop_assert!(bounds().contains(level));
                s.add_response(outcome).unwrap();
                prop_assert!(bounds().contains(s.current_level()));
            }
            let threshold = s.threshold().unwrap();
            prop_assert!(bounds().contains(threshold));
        }

        #[test]
        fn all_successes_never_raise_the_level(
            n_down in 1u32..4,
            len in 4usize..60,
        ) {
            let mut s = staircase(StaircaseConfig {
                start_level: 300.0,
                n_down,
                n_trials: len,
                ..StaircaseConfig::default()
            });
            let mut previous = s.current_level();
            for _ in 0..len {
                let level = respond(&mut s, true);
                prop_assert!(level <= previous);
                previous = level;
            }
            prop_assert!(s.reversals().is_empty());
        }

        #[test]
        fn all_failures_never_lower_the_level(
            n_up in 1u32..4,
            len in 4usize..60,
        ) {
            let mut s = staircase(StaircaseConfig {
                start_level: 50.0,
                n_up,
                n_trials: len,
                ..StaircaseConfig::default()
            });
            let mut previous = s.current_level();
            for _ in 0..len {
                let level = respond(&mut s, false);
                prop_assert!(level >= previous);
                previous = level;
            }
        }
    }
}
