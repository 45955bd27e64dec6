//! Bayesian sequential threshold estimation over a log-spaced grid.
//!
//! The unknown is the location `mu` of a logistic psychometric function in
//! log10 units:
//!
//! ```text
//! P(success | x, mu) = guess + (1 - guess - lapse) / (1 + exp(-slope * (log10 x - log10 mu)))
//! ```
//!
//! Each response multiplies the posterior over `mu` by its likelihood
//! (floored at `LIKELIHOOD_FLOOR`) and renormalises. A posterior whose mass
//! vanishes is never renormalised; the estimator is poisoned instead.

use awex_core::{Level, LevelBounds, ResponseRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::controller::AdaptiveController;
use crate::error::{AdaptiveError, ProtocolViolation, Result};

pub const LIKELIHOOD_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsychometricModel {
    pub guess_rate: f64,
    pub lapse_rate: f64,
    /// Per log10 unit of level.
    pub slope: f64,
}

impl Default for PsychometricModel {
    fn default() -> Self {
        Self {
            guess_rate: 0.02,
            lapse_rate: 0.02,
            slope: 8.0,
        }
    }
}

impl PsychometricModel {
    pub fn p_success(&self, log_level: f64, log_location: f64) -> f64 {
        let core = 1.0 / (1.0 + (-self.slope * (log_level - log_location)).exp());
        self.guess_rate + (1.0 - self.guess_rate - self.lapse_rate) * core
    }

    fn validate(&self) -> Result<()> {
        let rate_ok = |r: f64| r.is_finite() && (0.0..1.0).contains(&r);
        if !rate_ok(self.guess_rate) || !rate_ok(self.lapse_rate) {
            return Err(AdaptiveError::InvalidConfig(format!(
                "guess rate {} and lapse rate {} must lie in [0, 1)",
                self.guess_rate, self.lapse_rate
            )));
        }
        if self.guess_rate + self.lapse_rate >= 1.0 {
            return Err(AdaptiveError::InvalidConfig(
                "guess rate plus lapse rate must stay below 1".into(),
            ));
        }
        if !(self.slope.is_finite() && self.slope > 0.0) {
            return Err(AdaptiveError::InvalidConfig(format!(
                "slope {} must be positive",
                self.slope
            )));
        }
        Ok(())
    }
}

/// Which level the estimator asks for next.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Placement {
    /// Grid point of maximum posterior mass, lowest index on ties.
    Mode,
    /// Posterior mean of log10 level.
    Mean,
    Quantile { p: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Prior {
    Uniform,
    /// Gaussian in log10 level around a guessed threshold.
    LogGaussian { guess: Level, sd_log10: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesConfig {
    pub grid_size: usize,
    pub n_trials: usize,
    pub model: PsychometricModel,
    pub placement: Placement,
    pub prior: Prior,
    /// Posterior quantile reported as the threshold.
    pub target_quantile: f64,
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            grid_size: 61,
            n_trials: 50,
            model: PsychometricModel::default(),
            placement: Placement::Mode,
            prior: Prior::LogGaussian {
                guess: 150.0,
                sd_log10: 0.5,
            },
            target_quantile: 0.5,
        }
    }
}

impl BayesConfig {
    pub fn validate(&self, bounds: &LevelBounds) -> Result<()> {
        let invalid = |msg: String| Err(AdaptiveError::InvalidConfig(msg));
        if self.grid_size < 2 {
            return invalid(format!("grid needs at least 2 points, got {}", self.grid_size));
        }
        if self.n_trials == 0 {
            return invalid("estimator needs at least one trial".into());
        }
        if bounds.min() <= 0.0 {
            return invalid("a log-spaced grid needs a positive minimum level".into());
        }
        if !(0.0..=1.0).contains(&self.target_quantile) {
            return invalid(format!(
                "target quantile {} outside [0, 1]",
                self.target_quantile
            ));
        }
        if let Placement::Quantile { p } = self.placement {
            if !(0.0..=1.0).contains(&p) {
                return invalid(format!("placement quantile {p} outside [0, 1]"));
            }
        }
        if let Prior::LogGaussian { guess, sd_log10 } = self.prior {
            if !(guess.is_finite() && guess > 0.0 && sd_log10.is_finite() && sd_log10 > 0.0) {
                return invalid(format!(
                    "prior guess {guess} and spread {sd_log10} must be positive"
                ));
            }
        }
        self.model.validate()
    }
}

#[derive(Debug, Clone)]
pub struct SequentialBayesEstimator {
    config: BayesConfig,
    bounds: LevelBounds,
    grid: Vec<Level>,
    log_grid: Vec<f64>,
    posterior: Vec<f64>,
    pending: Option<Level>,
    trials_remaining: usize,
    aborted: bool,
    poisoned: bool,
    history: Vec<ResponseRecord>,
}

impl SequentialBayesEstimator {
    pub fn new(config: BayesConfig, bounds: LevelBounds) -> Result<Self> {
        config.validate(&bounds)?;
        let lo = bounds.min().log10();
        let hi = bounds.max().log10();
        let n = config.grid_size;
        let log_grid: Vec<f64> = (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect();
        let mut grid: Vec<Level> = log_grid
            .iter()
            .map(|l| bounds.clamp(10f64.powf(*l)))
            .collect();
        grid[0] = bounds.min();
        grid[n - 1] = bounds.max();

        let weights: Vec<f64> = match config.prior {
            Prior::Uniform => vec![1.0; n],
            Prior::LogGaussian { guess, sd_log10 } => {
                let centre = guess.log10();
                log_grid
                    .iter()
                    .map(|l| (-0.5 * ((l - centre) / sd_log10).powi(2)).exp())
                    .collect()
            }
        };
        let total: f64 = weights.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(AdaptiveError::InvalidConfig(
                "prior puts no mass on the grid".into(),
            ));
        }
        let posterior = weights.into_iter().map(|w| w / total).collect();

        info!(
            grid = n,
            min = bounds.min(),
            max = bounds.max(),
            trials = config.n_trials,
            "bayesian estimator created"
        );
        Ok(Self {
            trials_remaining: config.n_trials,
            config,
            bounds,
            grid,
            log_grid,
            posterior,
            pending: None,
            aborted: false,
            poisoned: false,
            history: Vec::new(),
        })
    }

    pub fn grid(&self) -> &[Level] {
        &self.grid
    }

    pub fn posterior(&self) -> &[f64] {
        &self.posterior
    }

    pub fn trials_remaining(&self) -> usize {
        self.trials_remaining
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Grid index of maximum posterior mass; the first one wins exact ties.
    pub fn mode_index(&self) -> usize {
        let mut best = 0;
        for (i, &p) in self.posterior.iter().enumerate().skip(1) {
            if p > self.posterior[best] {
                best = i;
            }
        }
        best
    }

    pub fn mean_level(&self) -> Level {
        let mean_log: f64 = self
            .posterior
            .iter()
            .zip(&self.log_grid)
            .map(|(p, l)| p * l)
            .sum();
        self.bounds.clamp(10f64.powf(mean_log))
    }

    /// Level where the cumulative posterior reaches `p`.
    ///
    /// Each grid point's mass is centred on the point; between centres the
    /// level is interpolated linearly in log space. `p` is clamped to [0, 1].
    pub fn quantile(&self, p: f64) -> Level {
        let p = if p.is_nan() { 0.5 } else { p.clamp(0.0, 1.0) };
        let mut before = 0.0;
        let mut previous: Option<(f64, f64)> = None;
        for (i, &mass) in self.posterior.iter().enumerate() {
            let centre = before + mass / 2.0;
            if centre >= p {
                return match previous {
                    None => self.grid[0],
                    Some((prev_centre, prev_log)) => {
                        let span = centre - prev_centre;
                        let t = if span > 0.0 { (p - prev_centre) / span } else { 0.0 };
                        let log = prev_log + t * (self.log_grid[i] - prev_log);
                        self.bounds.clamp(10f64.powf(log))
                    }
                };
            }
            previous = Some((centre, self.log_grid[i]));
            before += mass;
        }
        self.grid[self.grid.len() - 1]
    }

    /// Folds one observation at an arbitrary level into the posterior.
    ///
    /// Does not consume the trial budget and needs no pending query; used for
    /// responses collected outside the adaptive loop.
    pub fn observe(&mut self, level: Level, outcome: bool) -> Result<()> {
        if self.poisoned {
            return Err(AdaptiveError::NumericInstability {
                trials: self.history.len(),
            });
        }
        let level = self.bounds.clamp(level);
        self.history.push(ResponseRecord::new(level, outcome));
        let log_level = level.max(f64::MIN_POSITIVE).log10();

        for (mass, &log_mu) in self.posterior.iter_mut().zip(&self.log_grid) {
            let p = self.config.model.p_success(log_level, log_mu);
            let likelihood = if outcome { p } else { 1.0 - p };
            *mass *= likelihood.max(LIKELIHOOD_FLOOR);
        }
        let total: f64 = self.posterior.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            self.poisoned = true;
            error!(
                trials = self.history.len(),
                total, "posterior collapsed, estimator is unusable"
            );
            return Err(AdaptiveError::NumericInstability {
                trials: self.history.len(),
            });
        }
        for mass in &mut self.posterior {
            *mass /= total;
        }
        debug!(level, outcome, mode = self.grid[self.mode_index()], "posterior updated");
        Ok(())
    }

    fn placement_level(&self) -> Level {
        match self.config.placement {
            Placement::Mode => self.grid[self.mode_index()],
            Placement::Mean => self.mean_level(),
            Placement::Quantile { p } => self.quantile(p),
        }
    }
}

impl AdaptiveController for SequentialBayesEstimator {
    fn name(&self) -> &'static str {
        "bayes"
    }

    fn next_level(&mut self) -> Result<Level> {
        if self.aborted {
            return Err(ProtocolViolation::Aborted.into());
        }
        if self.poisoned {
            return Err(AdaptiveError::NumericInstability {
                trials: self.history.len(),
            });
        }
        if self.trials_remaining == 0 {
            return Err(ProtocolViolation::Exhausted.into());
        }
        if let Some(level) = self.pending {
            return Ok(level);
        }
        let level = self.placement_level();
        self.pending = Some(level);
        Ok(level)
    }

    fn add_response(&mut self, outcome: bool) -> Result<()> {
        if self.aborted {
            return Err(ProtocolViolation::Aborted.into());
        }
        if self.trials_remaining == 0 {
            return Err(ProtocolViolation::Exhausted.into());
        }
        let level = self
            .pending
            .take()
            .ok_or(ProtocolViolation::NoPendingQuery)?;
        self.trials_remaining -= 1;
        self.observe(level, outcome)
    }

    fn is_done(&self) -> bool {
        self.aborted || self.poisoned || self.trials_remaining == 0
    }

    fn abort(&mut self) {
        if !self.aborted {
            info!(completed = self.history.len(), "bayesian estimator aborted");
        }
        self.aborted = true;
        self.pending = None;
    }

    fn is_aborted(&self) -> bool {
        self.aborted
    }

    fn threshold(&self) -> Result<Level> {
        if self.poisoned {
            return Err(AdaptiveError::NumericInstability {
                trials: self.history.len(),
            });
        }
        Ok(self.quantile(self.config.target_quantile))
    }

    fn history(&self) -> &[ResponseRecord] {
        &self.history
    }
}
