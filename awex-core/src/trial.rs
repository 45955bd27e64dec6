use serde::{Deserialize, Serialize};

use crate::level::Level;

/// One adaptive-phase observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub level: Level,
    pub outcome: bool,
}

impl ResponseRecord {
    pub fn new(level: Level, outcome: bool) -> Self {
        Self { level, outcome }
    }
}

/// A planned main-block trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub level: Level,
    /// No target is shown; the level still sets the blank's duration.
    pub is_catch: bool,
    pub prime_congruent: bool,
    pub prime_shown: bool,
}

impl Trial {
    pub fn stimulus(level: Level, prime_congruent: bool) -> Self {
        Self {
            level,
            is_catch: false,
            prime_congruent,
            prime_shown: true,
        }
    }

    pub fn catch(level: Level) -> Self {
        Self {
            level,
            is_catch: true,
            prime_congruent: false,
            prime_shown: true,
        }
    }

    pub fn prime_absent(level: Level) -> Self {
        Self {
            level,
            is_catch: false,
            prime_congruent: false,
            prime_shown: false,
        }
    }
}
