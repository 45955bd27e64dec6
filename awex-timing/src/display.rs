use serde::{Deserialize, Serialize};

/// Source of the display's frame duration.
///
/// Exposure durations are requested in milliseconds but can only be shown in
/// whole frames; everything that turns a level into a presentation goes
/// through here.
pub trait DisplayTimingSource {
    fn frame_ms(&self) -> f64;

    /// Nearest whole frame count, never negative.
    fn frames_for(&self, ms: f64) -> u32 {
        let frame = self.frame_ms();
        if frame <= 0.0 || !ms.is_finite() || ms <= 0.0 {
            return 0;
        }
        (ms / frame).round() as u32
    }

    /// Like `frames_for` but at least one frame.
    fn frames_at_least_one(&self, ms: f64) -> u32 {
        self.frames_for(ms).max(1)
    }

    /// Duration actually shown for a requested one.
    fn quantize(&self, ms: f64) -> f64 {
        self.frames_for(ms) as f64 * self.frame_ms()
    }
}

impl<D: DisplayTimingSource + ?Sized> DisplayTimingSource for &D {
    fn frame_ms(&self) -> f64 {
        (**self).frame_ms()
    }
}

/// Display with a fixed, known refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedRefresh {
    pub refresh_hz: f64,
}

impl FixedRefresh {
    pub fn new(refresh_hz: f64) -> Self {
        Self { refresh_hz }
    }
}

impl Default for FixedRefresh {
    fn default() -> Self {
        Self::new(60.0)
    }
}

impl DisplayTimingSource for FixedRefresh {
    fn frame_ms(&self) -> f64 {
        if self.refresh_hz > 0.0 {
            1000.0 / self.refresh_hz
        } else {
            0.0
        }
    }
}
