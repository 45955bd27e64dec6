use serde::{Deserialize, Serialize};

use crate::level::Level;

/// Tilt of the grating. Left is 135 degrees, right is 45 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Left,
    Right,
}

impl Orientation {
    pub const ALL: [Orientation; 2] = [Orientation::Left, Orientation::Right];

    pub fn degrees(self) -> u16 {
        match self {
            Orientation::Left => 135,
            Orientation::Right => 45,
        }
    }

    /// Rotated by 90 degrees.
    pub fn flipped(self) -> Self {
        match self {
            Orientation::Left => Orientation::Right,
            Orientation::Right => Orientation::Left,
        }
    }

    /// Prime orientation for a target, same tilt when congruent.
    pub fn prime_for(self, congruent: bool) -> Self {
        if congruent { self } else { self.flipped() }
    }
}

/// Key the participant pressed for the speeded tilt choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiltKey(pub char);

/// Which key means which tilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyMapping {
    pub left: char,
    pub right: char,
}

impl Default for KeyMapping {
    fn default() -> Self {
        Self {
            left: 'a',
            right: 'd',
        }
    }
}

impl KeyMapping {
    pub fn orientation_for(&self, key: TiltKey) -> Option<Orientation> {
        let key = key.0.to_ascii_lowercase();
        if key == self.left.to_ascii_lowercase() {
            Some(Orientation::Left)
        } else if key == self.right.to_ascii_lowercase() {
            Some(Orientation::Right)
        } else {
            None
        }
    }

    pub fn key_for(&self, orientation: Orientation) -> TiltKey {
        match orientation {
            Orientation::Left => TiltKey(self.left),
            Orientation::Right => TiltKey(self.right),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.left.to_ascii_lowercase() != self.right.to_ascii_lowercase()
    }
}

/// What the display shows during one epoch of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochKind {
    Fixation,
    Mask,
    Target(Orientation),
    Blank,
    Prime(Orientation),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    pub kind: EpochKind,
    pub frames: u32,
    pub nominal_ms: Level,
}

/// Ordered presentation schedule the display collaborator plays back frame by frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochSequence {
    pub epochs: Vec<Epoch>,
}

impl EpochSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EpochKind, frames: u32, nominal_ms: Level) {
        self.epochs.push(Epoch {
            kind,
            frames,
            nominal_ms,
        });
    }

    pub fn total_frames(&self) -> u32 {
        self.epochs.iter().map(|e| e.frames).sum()
    }

    pub fn target(&self) -> Option<Orientation> {
        self.epochs.iter().find_map(|e| match e.kind {
            EpochKind::Target(o) => Some(o),
            _ => None,
        })
    }

    pub fn prime(&self) -> Option<Orientation> {
        self.epochs.iter().find_map(|e| match e.kind {
            EpochKind::Prime(o) => Some(o),
            _ => None,
        })
    }

    /// Epochs from target onset up to the following mask, empty when no target is shown.
    fn target_window(&self) -> impl Iterator<Item = &Epoch> {
        self.epochs
            .iter()
            .skip_while(|e| !matches!(e.kind, EpochKind::Target(_)))
            .enumerate()
            .take_while(|(i, e)| *i == 0 || e.kind == EpochKind::Blank)
            .map(|(_, e)| e)
    }

    /// Frames between target onset and the following mask, zero when no target is shown.
    pub fn target_soa_frames(&self) -> u32 {
        self.target_window().map(|e| e.frames).sum()
    }

    /// Requested duration of the same window.
    pub fn target_soa_ms(&self) -> Level {
        self.target_window().map(|e| e.nominal_ms).sum()
    }
}
