//! Boundary to the presentation and input layer.
//!
//! Every call that waits on the participant returns `Ok(None)` when they
//! quit; the runner turns that into an aborted session.

use awex_core::{EpochSequence, TiltKey};

use crate::error::Result;

/// How long an instruction screen stays up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageWait {
    /// Until the participant presses a key.
    Key,
    /// Fixed duration, no key needed.
    Millis(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Speeded tilt choice after the prime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltResponse {
    pub key: TiltKey,
    /// From prompt onset.
    pub rt_ms: f64,
}

pub trait Apparatus {
    fn instruct(&mut self, text: &str, wait: MessageWait) -> Result<Flow>;

    /// Plays the schedule back and returns once its last frame is shown.
    fn present(&mut self, sequence: &EpochSequence) -> Result<()>;

    fn tilt_choice(&mut self) -> Result<Option<TiltResponse>>;

    /// Yes/no: did the participant see a target.
    fn detection(&mut self) -> Result<Option<bool>>;

    /// Confidence 0 to 100 in steps of 10.
    fn confidence(&mut self) -> Result<Option<u8>>;

    /// Asks the operator for a threshold in ms; `Ok(None)` declines.
    fn manual_threshold(&mut self, reason: &str) -> Result<Option<f64>>;
}

impl<A: Apparatus + ?Sized> Apparatus for &mut A {
    fn instruct(&mut self, text: &str, wait: MessageWait) -> Result<Flow> {
        (**self).instruct(text, wait)
    }

    fn present(&mut self, sequence: &EpochSequence) -> Result<()> {
        (**self).present(sequence)
    }

    fn tilt_choice(&mut self) -> Result<Option<TiltResponse>> {
        (**self).tilt_choice()
    }

    fn detection(&mut self) -> Result<Option<bool>> {
        (**self).detection()
    }

    fn confidence(&mut self) -> Result<Option<u8>> {
        (**self).confidence()
    }

    fn manual_threshold(&mut self, reason: &str) -> Result<Option<f64>> {
        (**self).manual_threshold(reason)
    }
}

/// Snaps a raw 0..=100 rating down to the nearest multiple of ten.
pub fn snap_confidence(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    ((raw.clamp(0.0, 100.0) / 10.0).floor() * 10.0) as u8
}
