use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stimulus exposure duration in milliseconds.
pub type Level = f64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundsError {
    #[error("level bounds must be finite (got [{min}, {max}])")]
    NotFinite { min: f64, max: f64 },
    #[error("minimum level {min} is negative")]
    Negative { min: f64 },
    #[error("minimum level {min} exceeds maximum {max}")]
    Inverted { min: f64, max: f64 },
}

/// Closed interval every tested level is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds", into = "RawBounds")]
pub struct LevelBounds {
    min: Level,
    max: Level,
}

#[derive(Serialize, Deserialize)]
struct RawBounds {
    min: Level,
    max: Level,
}

impl LevelBounds {
    pub fn new(min: Level, max: Level) -> Result<Self, BoundsError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(BoundsError::NotFinite { min, max });
        }
        if min < 0.0 {
            return Err(BoundsError::Negative { min });
        }
        if min > max {
            return Err(BoundsError::Inverted { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Level {
        self.min
    }

    pub fn max(&self) -> Level {
        self.max
    }

    /// Moving past either bound is never an error; the level just sticks to it.
    pub fn clamp(&self, level: Level) -> Level {
        level.clamp(self.min, self.max)
    }

    pub fn contains(&self, level: Level) -> bool {
        level >= self.min && level <= self.max
    }
}

/// 7 ms (one frame at 144 Hz) to 500 ms.
impl Default for LevelBounds {
    fn default() -> Self {
        Self {
            min: 7.0,
            max: 500.0,
        }
    }
}

impl TryFrom<RawBounds> for LevelBounds {
    type Error = BoundsError;

    fn try_from(raw: RawBounds) -> Result<Self, Self::Error> {
        LevelBounds::new(raw.min, raw.max)
    }
}

impl From<LevelBounds> for RawBounds {
    fn from(bounds: LevelBounds) -> Self {
        RawBounds {
            min: bounds.min,
            max: bounds.max,
        }
    }
}
