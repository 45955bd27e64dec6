pub mod level;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use level::{BoundsError, Level, LevelBounds};
pub use phase::{Phase, StandardPhase};
pub use stimulus::{Epoch, EpochKind, EpochSequence, KeyMapping, Orientation, TiltKey};
pub use trial::{ResponseRecord, Trial};
