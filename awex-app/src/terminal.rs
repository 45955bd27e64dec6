use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use awex_core::{EpochSequence, KeyMapping, TiltKey};
use awex_experiment::{
    Apparatus, ExperimentError, Flow, MessageWait, TiltResponse, snap_confidence,
};
use awex_timing::{DisplayTimingSource, HighPrecisionTimer, Timer};
use tracing::debug;

type Result<T> = std::result::Result<T, ExperimentError>;

const QUIT: &str = "q";

/// Text-only apparatus: prompts on `out`, answers line by line from `input`.
///
/// Epochs are not drawn; `present` only waits out their duration so the
/// response timing around them stays realistic. `q` or end of input quits.
pub struct TerminalApparatus<R: BufRead, W: Write> {
    input: R,
    out: W,
    keys: KeyMapping,
    timer: HighPrecisionTimer,
    /// Skip the presentation waits.
    instant: bool,
}

impl<R: BufRead, W: Write> TerminalApparatus<R, W> {
    pub fn new(input: R, out: W, keys: KeyMapping, timer: HighPrecisionTimer) -> Self {
        Self {
            input,
            out,
            keys,
            timer,
            instant: false,
        }
    }

    pub fn without_waits(mut self) -> Self {
        self.instant = true;
        self
    }

    pub fn timer(&self) -> &HighPrecisionTimer {
        &self.timer
    }

    /// Trimmed next line, `None` at end of input or on `q`.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim().to_string();
        if line.eq_ignore_ascii_case(QUIT) {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn prompt(&mut self, text: &str) -> Result<()> {
        write!(self.out, "{text} ")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> Apparatus for TerminalApparatus<R, W> {
    fn instruct(&mut self, text: &str, wait: MessageWait) -> Result<Flow> {
        writeln!(self.out, "\n{text}")?;
        match wait {
            MessageWait::Millis(ms) => {
                self.out.flush()?;
                if !self.instant {
                    self.timer.sleep(Duration::from_millis(ms));
                }
                Ok(Flow::Continue)
            }
            MessageWait::Key => {
                self.prompt("[enter to continue, q to quit]")?;
                Ok(match self.read_line()? {
                    Some(_) => Flow::Continue,
                    None => Flow::Quit,
                })
            }
        }
    }

    fn present(&mut self, sequence: &EpochSequence) -> Result<()> {
        let frame_ms = self.timer.frame_ms();
        for epoch in &sequence.epochs {
            if epoch.frames == 0 {
                continue;
            }
            let planned = Duration::from_secs_f64(epoch.frames as f64 * frame_ms / 1000.0);
            if !self.instant {
                let started = Instant::now();
                self.timer.sleep(planned);
                let per_frame = started.elapsed() / epoch.frames;
                self.timer.record_frame(per_frame);
            }
            debug!(kind = ?epoch.kind, frames = epoch.frames, nominal_ms = epoch.nominal_ms, "epoch");
        }
        Ok(())
    }

    fn tilt_choice(&mut self) -> Result<Option<TiltResponse>> {
        let prompt = format!("Tilt? ({}) left / right ({})", self.keys.left, self.keys.right);
        loop {
            self.prompt(&prompt)?;
            let shown = self.timer.now();
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            let rt_ms = self.timer.elapsed(shown).as_secs_f64() * 1000.0;
            if let Some(c) = line.chars().next() {
                let key = TiltKey(c);
                if self.keys.orientation_for(key).is_some() {
                    return Ok(Some(TiltResponse { key, rt_ms }));
                }
            }
        }
    }

    fn detection(&mut self) -> Result<Option<bool>> {
        loop {
            self.prompt("Did you see the stimulus? (y/n)")?;
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            match line.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(Some(true)),
                "n" | "no" => return Ok(Some(false)),
                _ => {}
            }
        }
    }

    fn confidence(&mut self) -> Result<Option<u8>> {
        loop {
            self.prompt("How confident are you in this response? (0-100)")?;
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if let Ok(raw) = line.parse::<f64>() {
                return Ok(Some(snap_confidence(raw)));
            }
        }
    }

    fn manual_threshold(&mut self, reason: &str) -> Result<Option<f64>> {
        writeln!(self.out, "\n{reason}")?;
        loop {
            self.prompt("Threshold in ms (empty to decline):")?;
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.is_empty() {
                return Ok(None);
            }
            if let Ok(ms) = line.parse::<f64>() {
                return Ok(Some(ms));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awex_core::{EpochKind, Orientation};
    use std::io::Cursor;

    fn terminal(script: &str) -> TerminalApparatus<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalApparatus::new(
            Cursor::new(script.as_bytes().to_vec()),
            Vec::new(),
            KeyMapping::default(),
            HighPrecisionTimer::new(),
        )
        .without_waits()
    }

    #[test]
    fn reads_responses_and_skips_invalid_lines() {
        let mut t = terminal("x\nd\nmaybe\ny\nfoo\n47\n\n");
        let tilt = t.tilt_choice().unwrap().unwrap();
        assert_eq!(tilt.key, TiltKey('d'));
        assert!(tilt.rt_ms >= 0.0);
        assert_eq!(t.detection().unwrap(), Some(true));
        assert_eq!(t.confidence().unwrap(), Some(40));
        assert_eq!(t.manual_threshold("fit failed").unwrap(), None);
    }

    #[test]
    fn q_and_end_of_input_quit() {
        let mut t = terminal("q\n");
        assert_eq!(t.instruct("hello", MessageWait::Key).unwrap(), Flow::Quit);
        assert_eq!(t.detection().unwrap(), None);
        assert_eq!(
            t.instruct("Incorrect.", MessageWait::Millis(500)).unwrap(),
            Flow::Continue
        );
    }

    #[test]
    fn manual_threshold_parses_numbers() {
        let mut t = terminal("abc\n123.5\n");
        assert_eq!(t.manual_threshold("enter").unwrap(), Some(123.5));
        let out = String::from_utf8(t.out.clone()).unwrap();
        assert!(out.contains("enter"));
    }

    #[test]
    fn present_without_waits_records_nothing() {
        let mut t = terminal("");
        let mut seq = EpochSequence::new();
        seq.push(EpochKind::Target(Orientation::Left), 1, 8.0);
        seq.push(EpochKind::Fixation, 0, 0.0);
        t.present(&seq).unwrap();
        assert_eq!(t.timer().frame_count(), 0);
    }
}
