use awex_core::{Level, LevelBounds, Trial};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ExperimentError, Result};

/// Offsets (ms) around the threshold for a 9-level main block.
pub const OFFSETS_9: [f64; 9] = [-50.0, -35.0, -20.0, -10.0, 0.0, 10.0, 20.0, 35.0, 50.0];
/// Offsets (ms) around the threshold for a 7-level main block.
pub const OFFSETS_7: [f64; 7] = [-40.0, -25.0, -10.0, 0.0, 10.0, 25.0, 40.0];

/// Design of the main trial block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialPlan {
    /// Signed offsets added to the threshold, one tested level each.
    pub offsets: Vec<f64>,
    pub repeats_per_level: usize,
    pub catch_per_level: usize,
    /// Target shown, prime replaced by a blank.
    pub prime_absent_per_level: usize,
    pub prime_match_probability: f64,
}

impl Default for TrialPlan {
    fn default() -> Self {
        Self {
            offsets: OFFSETS_9.to_vec(),
            repeats_per_level: 15,
            catch_per_level: 2,
            prime_absent_per_level: 2,
            prime_match_probability: 0.5,
        }
    }
}

impl TrialPlan {
    /// Standard offset grid for 9 or 7 levels.
    pub fn standard_offsets(levels: usize) -> Option<Vec<f64>> {
        match levels {
            9 => Some(OFFSETS_9.to_vec()),
            7 => Some(OFFSETS_7.to_vec()),
            _ => None,
        }
    }

    pub fn total_trials(&self) -> usize {
        self.offsets.len()
            * (self.repeats_per_level + self.catch_per_level + self.prime_absent_per_level)
    }

    pub fn validate(&self) -> Result<()> {
        if self.offsets.is_empty() {
            return Err(ExperimentError::InvalidPlan("offset grid is empty".into()));
        }
        if let Some(bad) = self.offsets.iter().find(|o| !o.is_finite()) {
            return Err(ExperimentError::InvalidPlan(format!(
                "offset {bad} is not finite"
            )));
        }
        if !(0.0..=1.0).contains(&self.prime_match_probability) {
            return Err(ExperimentError::InvalidPlan(format!(
                "prime match probability {} outside [0, 1]",
                self.prime_match_probability
            )));
        }
        if self.total_trials() == 0 {
            return Err(ExperimentError::InvalidPlan(
                "plan produces no trials".into(),
            ));
        }
        Ok(())
    }
}

/// Builds the stratified, shuffled main-block trial list.
#[derive(Debug, Clone, Copy)]
pub struct TrialPlanner {
    bounds: LevelBounds,
}

impl TrialPlanner {
    pub fn new(bounds: LevelBounds) -> Self {
        Self { bounds }
    }

    /// Tested levels in offset order. Offsets that clamp to the same level are kept.
    pub fn levels(&self, threshold: Level, plan: &TrialPlan) -> Vec<Level> {
        plan.offsets
            .iter()
            .map(|offset| self.bounds.clamp(threshold + offset))
            .collect()
    }

    /// Trial list before shuffling, grouped by level.
    pub fn build_unshuffled<R: Rng + ?Sized>(
        &self,
        threshold: Level,
        plan: &TrialPlan,
        rng: &mut R,
    ) -> Result<Vec<Trial>> {
        if !threshold.is_finite() {
            return Err(ExperimentError::InvalidPlan(format!(
                "threshold {threshold} is not finite"
            )));
        }
        plan.validate()?;

        let mut trials = Vec::with_capacity(plan.total_trials());
        for level in self.levels(threshold, plan) {
            for _ in 0..plan.repeats_per_level {
                let congruent = rng.random_bool(plan.prime_match_probability);
                trials.push(Trial::stimulus(level, congruent));
            }
            for _ in 0..plan.catch_per_level {
                trials.push(Trial::catch(level));
            }
            for _ in 0..plan.prime_absent_per_level {
                trials.push(Trial::prime_absent(level));
            }
        }
        Ok(trials)
    }

    pub fn build_trials<R: Rng + ?Sized>(
        &self,
        threshold: Level,
        plan: &TrialPlan,
        rng: &mut R,
    ) -> Result<Vec<Trial>> {
        let mut trials = self.build_unshuffled(threshold, plan, rng)?;
        trials.shuffle(rng);
        info!(
            threshold,
            trials = trials.len(),
            levels = plan.offsets.len(),
            "main block planned"
        );
        Ok(trials)
    }
}
