use std::time::{Duration, Instant};

use tracing::debug;

use crate::display::DisplayTimingSource;

/// Trait for high-precision timers
pub trait Timer: Clone + Send + Sync {
    type Timestamp: Copy + Clone + Send + Sync;
    fn now(&self) -> Self::Timestamp;
    fn elapsed(&self, ts: Self::Timestamp) -> Duration;
    fn sleep(&self, d: Duration);
    fn record_frame(&mut self, d: Duration);
    fn frame_count(&self) -> usize;
    fn calibration_stats(&self) -> CalibrationStats;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationStats {
    pub samples: usize,
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

impl CalibrationStats {
    pub fn average_frame_ms(&self) -> f64 {
        self.average_frame_time_ns / 1_000_000.0
    }
}

/// Monotonic clock plus a ring of measured frame durations.
///
/// Until any frame has been recorded the nominal frame duration given at
/// construction stands in for the measured one.
#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    pub start: Instant,
    pub frame_times: Vec<Duration>,
    pub max_samples: usize,
    nominal_frame_ms: f64,
}

impl Timer for HighPrecisionTimer {
    type Timestamp = u64;

    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }

    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }

    fn record_frame(&mut self, d: Duration) {
        if self.frame_times.len() >= self.max_samples {
            self.frame_times.remove(0);
        }
        self.frame_times.push(d);
    }

    fn frame_count(&self) -> usize {
        self.frame_times.len()
    }

    fn calibration_stats(&self) -> CalibrationStats {
        let times: Vec<f64> = self
            .frame_times
            .iter()
            .map(|d| d.as_nanos() as f64)
            .collect();
        if times.is_empty() {
            return CalibrationStats::default();
        }
        let n = times.len() as f64;
        let avg = times.iter().sum::<f64>() / n;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / n;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        CalibrationStats {
            samples: times.len(),
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

impl HighPrecisionTimer {
    pub fn new() -> Self {
        Self::with_nominal_refresh(60.0)
    }

    pub fn with_nominal_refresh(refresh_hz: f64) -> Self {
        Self {
            start: Instant::now(),
            frame_times: Vec::with_capacity(1000),
            max_samples: 1000,
            nominal_frame_ms: 1000.0 / refresh_hz,
        }
    }

    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "linux")]
        self.linux_sleep(duration);
        #[cfg(not(target_os = "linux"))]
        self.spin_sleep(duration);
    }

    #[cfg(target_os = "linux")]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

        let req = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };

        // SAFETY: `req` is a valid timespec and a null remainder pointer is allowed.
        unsafe {
            clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
        }
    }

    /// Coarse OS sleep for all but the last millisecond, then spin.
    #[cfg(not(target_os = "linux"))]
    fn spin_sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        if let Some(coarse) = duration.checked_sub(Duration::from_millis(1)) {
            std::thread::sleep(coarse);
        }
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayTimingSource for HighPrecisionTimer {
    fn frame_ms(&self) -> f64 {
        let stats = self.calibration_stats();
        if stats.samples == 0 || stats.average_frame_time_ns <= 0.0 {
            debug!(
                nominal_ms = self.nominal_frame_ms,
                "no frames measured, using nominal frame duration"
            );
            return self.nominal_frame_ms;
        }
        stats.average_frame_ms()
    }
}
