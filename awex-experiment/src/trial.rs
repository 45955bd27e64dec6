use awex_core::{EpochKind, EpochSequence, Level, Orientation, Trial};
use awex_timing::DisplayTimingSource;
use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};

/// Fixed epoch durations of a trial, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialTimings {
    pub fixation_ms: f64,
    /// Longer fixation used outside the main block.
    pub practice_fixation_ms: f64,
    pub mask_ms: f64,
    pub prime_soa_ms: f64,
    pub reverse_mask_ms: f64,
    /// Blank before the tilt prompt, drawn uniformly from `[min, max)`.
    pub response_delay_ms: (u64, u64),
    pub iti_ms: (u64, u64),
    /// Frames a grating stays on screen before its blank.
    pub grating_frames: u32,
}

impl Default for TrialTimings {
    fn default() -> Self {
        Self {
            fixation_ms: 100.0,
            practice_fixation_ms: 750.0,
            mask_ms: 100.0,
            prime_soa_ms: 7.0,
            reverse_mask_ms: 100.0,
            response_delay_ms: (250, 550),
            iti_ms: (650, 950),
            grating_frames: 1,
        }
    }
}

impl TrialTimings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fixation_ms", self.fixation_ms),
            ("practice_fixation_ms", self.practice_fixation_ms),
            ("mask_ms", self.mask_ms),
            ("prime_soa_ms", self.prime_soa_ms),
            ("reverse_mask_ms", self.reverse_mask_ms),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ExperimentError::InvalidConfig(format!(
                    "{name} must be a non-negative duration, got {value}"
                )));
            }
        }
        for (name, (lo, hi)) in [
            ("response_delay_ms", self.response_delay_ms),
            ("iti_ms", self.iti_ms),
        ] {
            if lo >= hi {
                return Err(ExperimentError::InvalidConfig(format!(
                    "{name} range [{lo}, {hi}) is empty"
                )));
            }
        }
        if self.grating_frames == 0 {
            return Err(ExperimentError::InvalidConfig(
                "gratings need at least one frame".into(),
            ));
        }
        Ok(())
    }
}

/// Turns levels into frame schedules for the display.
///
/// Fixation rounds to whole frames and may vanish. Masks and blanks are
/// always at least one frame. A grating is shown for `grating_frames` and
/// the rest of its SOA is filled with blank.
pub struct SequenceBuilder<'a, D: DisplayTimingSource + ?Sized> {
    timings: &'a TrialTimings,
    display: &'a D,
}

impl<'a, D: DisplayTimingSource + ?Sized> SequenceBuilder<'a, D> {
    pub fn new(timings: &'a TrialTimings, display: &'a D) -> Self {
        Self { timings, display }
    }

    fn fixation(&self, seq: &mut EpochSequence, ms: f64) {
        seq.push(EpochKind::Fixation, self.display.frames_for(ms), ms);
    }

    fn mask(&self, seq: &mut EpochSequence, ms: f64) {
        seq.push(EpochKind::Mask, self.display.frames_at_least_one(ms), ms);
    }

    fn blank(&self, seq: &mut EpochSequence, ms: f64) {
        seq.push(EpochKind::Blank, self.display.frames_at_least_one(ms), ms);
    }

    fn grating(&self, seq: &mut EpochSequence, kind: EpochKind, soa_ms: Level) {
        let frames = self.timings.grating_frames;
        let shown_ms = self.display.frame_ms() * frames as f64;
        seq.push(kind, frames, shown_ms);
        let rest = soa_ms - shown_ms;
        if rest > 0.0 {
            self.blank(seq, rest);
        }
    }

    /// Full trial at the practice SOA with a prime, not recorded.
    pub fn practice(&self, target: Orientation, soa_ms: Level, prime: Orientation) -> EpochSequence {
        let t = self.timings;
        let mut seq = EpochSequence::new();
        self.fixation(&mut seq, t.practice_fixation_ms);
        self.mask(&mut seq, t.mask_ms);
        self.grating(&mut seq, EpochKind::Target(target), soa_ms);
        self.mask(&mut seq, t.mask_ms);
        self.grating(&mut seq, EpochKind::Prime(prime), t.prime_soa_ms);
        self.mask(&mut seq, t.reverse_mask_ms);
        seq
    }

    /// Target (or a same-length blank when `target` is `None`) between two masks.
    pub fn detection(&self, target: Option<Orientation>, soa_ms: Level) -> EpochSequence {
        let t = self.timings;
        let mut seq = EpochSequence::new();
        self.fixation(&mut seq, t.practice_fixation_ms);
        self.mask(&mut seq, t.mask_ms);
        match target {
            Some(orientation) => self.grating(&mut seq, EpochKind::Target(orientation), soa_ms),
            None => self.blank(&mut seq, soa_ms),
        }
        self.mask(&mut seq, t.mask_ms);
        seq
    }

    pub fn main_trial(
        &self,
        trial: &Trial,
        target: Orientation,
        response_delay_ms: f64,
    ) -> EpochSequence {
        let t = self.timings;
        let mut seq = EpochSequence::new();
        self.fixation(&mut seq, t.fixation_ms);
        self.mask(&mut seq, t.mask_ms);
        if trial.is_catch {
            self.blank(&mut seq, trial.level);
        } else {
            self.grating(&mut seq, EpochKind::Target(target), trial.level);
        }
        self.mask(&mut seq, t.mask_ms);
        if trial.prime_shown {
            let prime = target.prime_for(trial.prime_congruent);
            self.grating(&mut seq, EpochKind::Prime(prime), t.prime_soa_ms);
        } else {
            self.blank(&mut seq, t.prime_soa_ms);
        }
        self.mask(&mut seq, t.reverse_mask_ms);
        self.blank(&mut seq, response_delay_ms);
        seq
    }

    pub fn inter_trial(&self, ms: f64) -> EpochSequence {
        let mut seq = EpochSequence::new();
        self.fixation(&mut seq, ms);
        seq
    }
}
