use awex_core::{EpochSequence, KeyMapping, Level, Orientation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::apparatus::{Apparatus, Flow, MessageWait, TiltResponse, snap_confidence};
use crate::error::{ExperimentError, Result};

/// Response behaviour of the simulated participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverProfile {
    /// Target SOA seen half of the time above the false-alarm floor.
    pub threshold_ms: Level,
    /// Logistic scale in ms.
    pub spread_ms: f64,
    pub false_alarm_rate: f64,
    pub lapse_rate: f64,
    /// Chance of naming the prime tilt correctly.
    pub prime_accuracy: f64,
    pub rt_ms: (f64, f64),
}

impl Default for ObserverProfile {
    fn default() -> Self {
        Self {
            threshold_ms: 90.0,
            spread_ms: 15.0,
            false_alarm_rate: 0.05,
            lapse_rate: 0.02,
            prime_accuracy: 0.7,
            rt_ms: (350.0, 650.0),
        }
    }
}

impl ObserverProfile {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ExperimentError::InvalidConfig(msg));
        if !self.threshold_ms.is_finite() {
            return invalid(format!("observer threshold {} is not finite", self.threshold_ms));
        }
        if !(self.spread_ms.is_finite() && self.spread_ms > 0.0) {
            return invalid(format!("observer spread {} must be positive", self.spread_ms));
        }
        for (name, value) in [
            ("false_alarm_rate", self.false_alarm_rate),
            ("lapse_rate", self.lapse_rate),
            ("prime_accuracy", self.prime_accuracy),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} {value} outside [0, 1]"));
            }
        }
        if self.false_alarm_rate + self.lapse_rate > 1.0 {
            return invalid("false_alarm_rate and lapse_rate exceed 1 together".into());
        }
        let (lo, hi) = self.rt_ms;
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo <= hi) {
            return invalid(format!("observer rt range ({lo}, {hi}) is invalid"));
        }
        Ok(())
    }

    pub fn p_seen(&self, soa_ms: Level) -> f64 {
        let f = 1.0 / (1.0 + (-(soa_ms - self.threshold_ms) / self.spread_ms).exp());
        self.false_alarm_rate + (1.0 - self.false_alarm_rate - self.lapse_rate) * f
    }
}

/// Scripted participant answering from the last presented schedule.
#[derive(Debug)]
pub struct SimulatedObserver<R: Rng> {
    profile: ObserverProfile,
    keys: KeyMapping,
    rng: R,
    target_soa_ms: Option<Level>,
    prime: Option<Orientation>,
    seen: bool,
    responses: usize,
    quit_after: Option<usize>,
    manual_answer: Option<f64>,
    presented: usize,
}

impl<R: Rng> SimulatedObserver<R> {
    pub fn new(profile: ObserverProfile, keys: KeyMapping, rng: R) -> Result<Self> {
        profile.validate()?;
        Ok(Self {
            profile,
            keys,
            rng,
            target_soa_ms: None,
            prime: None,
            seen: false,
            responses: 0,
            quit_after: None,
            manual_answer: None,
            presented: 0,
        })
    }

    /// Quits instead of giving response number `n + 1`.
    pub fn quit_after(mut self, n: usize) -> Self {
        self.quit_after = Some(n);
        self
    }

    /// Value typed in whenever a manual threshold is requested.
    pub fn with_manual_answer(mut self, ms: f64) -> Self {
        self.manual_answer = Some(ms);
        self
    }

    pub fn responses(&self) -> usize {
        self.responses
    }

    pub fn presented(&self) -> usize {
        self.presented
    }

    /// Counts a response, `false` once the quit point is reached.
    fn respond(&mut self) -> bool {
        if self.quit_after.is_some_and(|n| self.responses >= n) {
            debug!(responses = self.responses, "simulated observer quits");
            return false;
        }
        self.responses += 1;
        true
    }
}

impl<R: Rng> Apparatus for SimulatedObserver<R> {
    fn instruct(&mut self, _text: &str, _wait: MessageWait) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    fn present(&mut self, sequence: &EpochSequence) -> Result<()> {
        self.presented += 1;
        self.target_soa_ms = sequence.target().map(|_| sequence.target_soa_ms());
        self.prime = sequence.prime();
        let p = match self.target_soa_ms {
            Some(soa) => self.profile.p_seen(soa),
            None => self.profile.false_alarm_rate,
        };
        self.seen = self.rng.random_bool(p.clamp(0.0, 1.0));
        Ok(())
    }

    fn tilt_choice(&mut self) -> Result<Option<TiltResponse>> {
        if !self.respond() {
            return Ok(None);
        }
        let orientation = match self.prime {
            Some(prime) if self.rng.random_bool(self.profile.prime_accuracy.clamp(0.0, 1.0)) => prime,
            Some(prime) => prime.flipped(),
            None => Orientation::ALL[self.rng.random_range(0..Orientation::ALL.len())],
        };
        let (lo, hi) = self.profile.rt_ms;
        let rt_ms = if hi > lo {
            self.rng.random_range(lo..hi)
        } else {
            lo
        };
        Ok(Some(TiltResponse {
            key: self.keys.key_for(orientation),
            rt_ms,
        }))
    }

    fn detection(&mut self) -> Result<Option<bool>> {
        if !self.respond() {
            return Ok(None);
        }
        Ok(Some(self.seen))
    }

    fn confidence(&mut self) -> Result<Option<u8>> {
        if !self.respond() {
            return Ok(None);
        }
        let raw = if self.seen {
            self.rng.random_range(50.0..100.0)
        } else {
            self.rng.random_range(0.0..50.0)
        };
        Ok(Some(snap_confidence(raw)))
    }

    fn manual_threshold(&mut self, reason: &str) -> Result<Option<f64>> {
        debug!(reason, answer = ?self.manual_answer, "manual threshold requested");
        Ok(self.manual_answer)
    }
}
