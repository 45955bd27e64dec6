pub mod display;
pub mod timer;

pub use display::{DisplayTimingSource, FixedRefresh};
pub use timer::{CalibrationStats, HighPrecisionTimer, Timer};
