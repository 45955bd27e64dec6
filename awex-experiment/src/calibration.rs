//! Turning a finished (or failed) adaptive phase into the threshold the main
//! block is planned around.

use awex_adaptive::{AdaptiveController, AdaptiveError, FitResult, PsychometricFitter};
use awex_core::{Level, LevelBounds};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::apparatus::Apparatus;
use crate::config::ThresholdFitConfig;
use crate::error::{ExperimentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    Controller,
    Fitted,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEstimate {
    pub level: Level,
    pub source: ThresholdSource,
    /// What the adaptive controller itself reported, if it could.
    pub controller_estimate: Option<Level>,
    pub fit: Option<FitResult>,
}

impl ThresholdEstimate {
    pub fn from_controller(level: Level) -> Self {
        Self {
            level,
            source: ThresholdSource::Controller,
            controller_estimate: Some(level),
            fit: None,
        }
    }
}

/// Fits the logistic to the controller history and reads it at the target probability.
pub fn fitted_threshold(
    controller: &dyn AdaptiveController,
    config: &ThresholdFitConfig,
) -> std::result::Result<(FitResult, Level), AdaptiveError> {
    let fitter = PsychometricFitter::new(config.fitter);
    let fit = fitter.fit_records(controller.history())?;
    let level = fitter.threshold_at(&fit, config.target_probability)?;
    Ok((fit, level))
}

/// Replaces the estimate with an operator-entered value and logs the override.
pub fn manual_override(
    mut estimate: ThresholdEstimate,
    manual: Level,
    bounds: LevelBounds,
) -> ThresholdEstimate {
    let level = bounds.clamp(manual);
    warn!(
        previous = estimate.level,
        previous_source = ?estimate.source,
        manual,
        applied = level,
        "threshold overridden manually"
    );
    estimate.level = level;
    estimate.source = ThresholdSource::Manual;
    estimate
}

fn prompt_manual<A: Apparatus + ?Sized>(apparatus: &mut A, reason: &str) -> Result<Option<Level>> {
    match apparatus.manual_threshold(reason)? {
        Some(v) if v.is_finite() => Ok(Some(v)),
        Some(v) => {
            warn!(value = v, "ignoring non-finite manual threshold");
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Resolves the main-block threshold.
///
/// Order: controller estimate, then the fit when enabled, then a manual
/// override when the operator is asked and answers. A controller that cannot
/// report (numeric collapse) leaves the manual entry as the only way on.
pub fn resolve_threshold<A: Apparatus + ?Sized>(
    controller: &dyn AdaptiveController,
    config: &ThresholdFitConfig,
    bounds: LevelBounds,
    apparatus: &mut A,
) -> Result<ThresholdEstimate> {
    let controller_level = match controller.threshold() {
        Ok(level) => level,
        Err(err @ AdaptiveError::NumericInstability { .. }) => {
            warn!(error = %err, "controller estimate unavailable");
            let reason = format!("{err}; enter a threshold in ms");
            return match prompt_manual(apparatus, &reason)? {
                Some(manual) => Ok(manual_override(
                    ThresholdEstimate {
                        level: manual,
                        source: ThresholdSource::Manual,
                        controller_estimate: None,
                        fit: None,
                    },
                    manual,
                    bounds,
                )),
                None => Err(ExperimentError::NoThreshold(err.to_string())),
            };
        }
        Err(err) => return Err(err.into()),
    };
    info!(
        controller = controller.name(),
        threshold = controller_level,
        reversals = controller.reversals().len(),
        "controller threshold"
    );
    let mut estimate = ThresholdEstimate::from_controller(controller_level);

    if config.enabled {
        match fitted_threshold(controller, config) {
            Ok((fit, level)) => {
                info!(
                    location = fit.location,
                    scale = fit.scale,
                    asymptote = fit.asymptote,
                    threshold = level,
                    p = config.target_probability,
                    "psychometric fit"
                );
                estimate.level = bounds.clamp(level);
                estimate.source = ThresholdSource::Fitted;
                estimate.fit = Some(fit);
            }
            Err(
                err @ (AdaptiveError::FitConvergence(_) | AdaptiveError::UnreachableTarget { .. }),
            ) => {
                warn!(error = %err, "psychometric fit failed");
                let reason = format!("{err}; enter a threshold in ms or decline");
                return Ok(match prompt_manual(apparatus, &reason)? {
                    Some(manual) => manual_override(estimate, manual, bounds),
                    None => {
                        info!(
                            threshold = estimate.level,
                            "manual entry declined, using controller estimate"
                        );
                        estimate
                    }
                });
            }
            Err(err) => return Err(err.into()),
        }
    }

    if config.offer_manual_override {
        let reason = format!("estimated threshold {:.1} ms; override or decline", estimate.level);
        if let Some(manual) = prompt_manual(apparatus, &reason)? {
            estimate = manual_override(estimate, manual, bounds);
        }
    }
    Ok(estimate)
}
