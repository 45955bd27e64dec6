use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use awex_core::{Level, ResponseRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::ThresholdEstimate;
use crate::error::Result;

pub const HEADER: [&str; 11] = [
    "subj",
    "trial",
    "soa_ms",
    "catch_trial",
    "detect_yn",
    "confidence",
    "rt_prime_ms",
    "prime_shown",
    "prime_congruent",
    "prime_correct",
    "threshold",
];

/// Who and when, as typed in at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub participant: String,
    pub run: String,
    pub date: String,
}

impl SessionInfo {
    /// `{participant}_{run}_{date}`, the stem shared by the CSV and the summary.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.participant, self.run, self.date)
    }
}

/// One main-block trial as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub subj: String,
    pub trial: usize,
    pub soa_ms: Level,
    pub catch_trial: bool,
    pub detect_yn: bool,
    pub confidence: u8,
    pub rt_prime_ms: f64,
    pub prime_shown: bool,
    pub prime_congruent: bool,
    /// `None` when no prime was shown.
    pub prime_correct: Option<bool>,
    pub threshold: Level,
}

pub trait RecordSink {
    fn write_record(&mut self, record: &TrialRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn write_record(&mut self, record: &TrialRecord) -> Result<()> {
        (**self).write_record(record)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Keeps records in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<TrialRecord>,
    pub flushes: usize,
}

impl RecordSink for MemorySink {
    fn write_record(&mut self, record: &TrialRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

fn py_bool(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

fn float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn field(s: &str, delimiter: char) -> String {
    if s.contains(delimiter) || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Flat delimited rows with a header line, flushed after every row.
pub struct DelimitedWriter<W: Write> {
    out: W,
    delimiter: char,
    rows: usize,
}

impl<W: Write> DelimitedWriter<W> {
    /// Comma-delimited; writes the header immediately.
    pub fn new(out: W) -> Result<Self> {
        Self::with_delimiter(out, ',')
    }

    pub fn with_delimiter(mut out: W, delimiter: char) -> Result<Self> {
        let header = HEADER.join(&delimiter.to_string());
        writeln!(out, "{header}")?;
        out.flush()?;
        Ok(Self {
            out,
            delimiter,
            rows: 0,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn format_row(&self, r: &TrialRecord) -> String {
        let cells = [
            field(&r.subj, self.delimiter),
            r.trial.to_string(),
            float(r.soa_ms),
            py_bool(r.catch_trial).to_string(),
            py_bool(r.detect_yn).to_string(),
            r.confidence.to_string(),
            float(r.rt_prime_ms),
            py_bool(r.prime_shown).to_string(),
            py_bool(r.prime_congruent).to_string(),
            r.prime_correct.map_or("None", py_bool).to_string(),
            float(r.threshold),
        ];
        cells.join(&self.delimiter.to_string())
    }
}

impl DelimitedWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "trial file opened");
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> RecordSink for DelimitedWriter<W> {
    fn write_record(&mut self, record: &TrialRecord) -> Result<()> {
        let row = self.format_row(record);
        writeln!(self.out, "{row}")?;
        self.out.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    /// The participant quit, or no threshold could be established.
    Aborted,
    /// A phase returned an error; `SessionSummary::error` holds it.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebriefStats {
    pub stimulus_trials: usize,
    pub catch_trials: usize,
    /// "Seen" on target-present trials.
    pub hit_rate: Option<f64>,
    /// "Seen" on catch trials.
    pub false_alarm_rate: Option<f64>,
    pub mean_prime_rt_ms: Option<f64>,
    pub prime_accuracy: Option<f64>,
}

fn rate(hits: usize, n: usize) -> Option<f64> {
    (n > 0).then(|| hits as f64 / n as f64)
}

impl DebriefStats {
    pub fn from_records(records: &[TrialRecord]) -> Self {
        let stimulus: Vec<&TrialRecord> = records.iter().filter(|r| !r.catch_trial).collect();
        let catch: Vec<&TrialRecord> = records.iter().filter(|r| r.catch_trial).collect();
        let judged: Vec<bool> = records.iter().filter_map(|r| r.prime_correct).collect();
        let rts: Vec<f64> = records
            .iter()
            .filter(|r| r.prime_shown)
            .map(|r| r.rt_prime_ms)
            .collect();
        Self {
            stimulus_trials: stimulus.len(),
            catch_trials: catch.len(),
            hit_rate: rate(stimulus.iter().filter(|r| r.detect_yn).count(), stimulus.len()),
            false_alarm_rate: rate(catch.iter().filter(|r| r.detect_yn).count(), catch.len()),
            mean_prime_rt_ms: (!rts.is_empty()).then(|| rts.iter().sum::<f64>() / rts.len() as f64),
            prime_accuracy: rate(judged.iter().filter(|c| **c).count(), judged.len()),
        }
    }
}

/// Everything about a session that is not a per-trial row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: SessionInfo,
    pub outcome: SessionOutcome,
    /// Label of the phase the session ended in.
    pub last_phase: String,
    pub controller: String,
    pub calibration_history: Vec<ResponseRecord>,
    pub reversals: Vec<Level>,
    pub threshold: Option<ThresholdEstimate>,
    pub main_trials_planned: usize,
    pub main_trials_recorded: usize,
    pub debrief: DebriefStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionSummary {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.flush()?;
        debug!(path = %path.as_ref().display(), "session summary written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(trial: usize, catch_trial: bool, detect: bool, prime_correct: Option<bool>) -> TrialRecord {
        TrialRecord {
            subj: "p01".into(),
            trial,
            soa_ms: 92.5,
            catch_trial,
            detect_yn: detect,
            confidence: 70,
            rt_prime_ms: 412.25,
            prime_shown: prime_correct.is_some(),
            prime_congruent: false,
            prime_correct,
            threshold: 100.0,
        }
    }

    #[test]
    fn rows_follow_header_layout() {
        let mut writer = DelimitedWriter::new(Vec::new()).unwrap();
        writer.write_record(&record(0, false, true, Some(true))).unwrap();
        writer.write_record(&record(1, true, false, None)).unwrap();
        assert_eq!(writer.rows(), 2);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "subj,trial,soa_ms,catch_trial,detect_yn,confidence,rt_prime_ms,prime_shown,prime_congruent,prime_correct,threshold"
        );
        assert_eq!(lines[1], "p01,0,92.5,False,True,70,412.25,True,False,True,100.0");
        assert_eq!(lines[2], "p01,1,92.5,True,False,70,412.25,False,False,None,100.0");
        for line in &lines {
            assert_eq!(line.split(',').count(), HEADER.len());
        }
    }

    #[test]
    fn subject_with_delimiter_is_quoted() {
        let mut writer = DelimitedWriter::new(Vec::new()).unwrap();
        let mut r = record(3, false, false, Some(false));
        r.subj = "doe, j".into();
        writer.write_record(&r).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("\"doe, j\",3,"));
    }

    #[test]
    fn header_only_when_nothing_recorded() {
        let writer = DelimitedWriter::with_delimiter(Vec::new(), '\t').unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("subj\ttrial\t"));
    }

    #[test]
    fn debrief_rates() {
        let records = vec![
            record(0, false, true, Some(true)),
            record(1, false, false, Some(false)),
            record(2, false, true, None),
            record(3, true, true, Some(true)),
        ];
        let stats = DebriefStats::from_records(&records);
        assert_eq!(stats.stimulus_trials, 3);
        assert_eq!(stats.catch_trials, 1);
        assert!((stats.hit_rate.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.false_alarm_rate, Some(1.0));
        assert!((stats.prime_accuracy.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.mean_prime_rt_ms, Some(412.25));
        assert_eq!(DebriefStats::from_records(&[]), DebriefStats::default());
    }

    #[test]
    fn file_stem_joins_session_fields() {
        let info = SessionInfo {
            participant: "p01".into(),
            run: "001".into(),
            date: "2026-10-19_14-05".into(),
        };
        assert_eq!(info.file_stem(), "p01_001_2026-10-19_14-05");
    }
}
