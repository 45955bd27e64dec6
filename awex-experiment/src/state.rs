use awex_adaptive::{AdaptiveController, AdaptiveError};
use awex_core::{Level, Orientation, Phase, StandardPhase};
use awex_timing::DisplayTimingSource;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::apparatus::{Apparatus, Flow, MessageWait};
use crate::calibration::{ThresholdEstimate, resolve_threshold};
use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::plan::TrialPlanner;
use crate::record::{
    DebriefStats, RecordSink, SessionInfo, SessionOutcome, SessionSummary, TrialRecord,
};
use crate::trial::SequenceBuilder;

const WELCOME_TEXT: &str = "Welcome.\n\nYou will complete a series of rapid trials. \
On each trial, keep your eyes on the center cross.";
const PRACTICE_TEXT: &str = "Now we'll do a few practice trials to get you familiar with the timing.\n\
After that, we'll adjust the difficulty to your threshold.";
const DETECTION_TEXT: &str = "Next, still for practice, a stimulus may or may not be shown. \
Say whether you saw it. You will be told when you are incorrect.";
const CALIBRATION_TEXT: &str = "We will now calibrate the difficulty to determine your threshold.";
const EXPERIMENT_TEXT: &str = "We will now begin the experiment.";
const DEBRIEF_TEXT: &str = "Done! Thank you for taking part.";
const INCORRECT_TEXT: &str = "Incorrect.";

/// Unwraps a participant response or ends the phase with `Flow::Quit`.
macro_rules! or_quit {
    ($response:expr) => {
        match $response? {
            Some(value) => value,
            None => return Ok(Flow::Quit),
        }
    };
}

#[derive(Debug)]
pub struct RunReport {
    pub summary: SessionSummary,
    /// Controller of the calibration phase, if it was reached.
    pub controller: Option<Box<dyn AdaptiveController>>,
    pub records: Vec<TrialRecord>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    Aborted(RunReport),
    /// A phase failed; the report holds everything collected up to that point.
    Failed {
        report: RunReport,
        error: ExperimentError,
    },
}

impl RunOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            RunOutcome::Completed(report)
            | RunOutcome::Aborted(report)
            | RunOutcome::Failed { report, .. } => report,
        }
    }

    pub fn into_report(self) -> RunReport {
        match self {
            RunOutcome::Completed(report)
            | RunOutcome::Aborted(report)
            | RunOutcome::Failed { report, .. } => report,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

#[derive(Debug, Default)]
struct SessionState {
    controller: Option<Box<dyn AdaptiveController>>,
    threshold: Option<ThresholdEstimate>,
    planned: usize,
    records: Vec<TrialRecord>,
}

/// Drives one session through the standard phases.
///
/// Presentation and responses go through `A`, frame rounding through `D`,
/// main-block rows into `S`. All randomness is drawn from `R`.
pub struct ExperimentRunner<A, D, S, R>
where
    A: Apparatus,
    D: DisplayTimingSource,
    S: RecordSink,
    R: Rng,
{
    config: ExperimentConfig,
    session: SessionInfo,
    apparatus: A,
    display: D,
    sink: S,
    rng: R,
    phase: StandardPhase,
}

impl<A, D, S, R> ExperimentRunner<A, D, S, R>
where
    A: Apparatus,
    D: DisplayTimingSource,
    S: RecordSink,
    R: Rng,
{
    pub fn new(
        config: ExperimentConfig,
        session: SessionInfo,
        apparatus: A,
        display: D,
        sink: S,
        rng: R,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session,
            apparatus,
            display,
            sink,
            rng,
            phase: StandardPhase::default(),
        })
    }

    pub fn phase(&self) -> StandardPhase {
        self.phase
    }

    /// Runs every phase and always hands back what was collected.
    ///
    /// Rows already written stay in the sink, which is flushed on every exit.
    /// A phase error ends the session as `RunOutcome::Failed`.
    pub fn run(mut self) -> RunOutcome {
        let mut state = SessionState::default();
        info!(
            participant = %self.session.participant,
            run = %self.session.run,
            frame_ms = self.display.frame_ms(),
            "session started"
        );
        let result = match self.run_phases(&mut state) {
            Ok(outcome) => self.sink.flush().map(|()| outcome),
            Err(err) => Err(err),
        };
        match result {
            Ok(SessionOutcome::Completed) => {
                RunOutcome::Completed(self.finish(state, SessionOutcome::Completed, None))
            }
            Ok(outcome) => RunOutcome::Aborted(self.finish(state, outcome, None)),
            Err(error) => {
                error!(phase = self.phase.label(), error = %error, "session failed");
                if let Err(flush_err) = self.sink.flush() {
                    error!(error = %flush_err, "could not flush records");
                }
                if let Some(controller) = state.controller.as_mut() {
                    if !controller.is_done() {
                        controller.abort();
                    }
                }
                let report = self.finish(state, SessionOutcome::Failed, Some(&error));
                RunOutcome::Failed { report, error }
            }
        }
    }

    fn run_phases(&mut self, state: &mut SessionState) -> Result<SessionOutcome> {
        loop {
            info!(phase = self.phase.label(), "phase started");
            let flow = match self.phase {
                phase if phase.is_welcome() => self.welcome()?,
                phase if phase.is_practice() => self.practice()?,
                phase if phase.is_detection_practice() => self.detection_practice()?,
                phase if phase.is_calibration() => self.calibration(state)?,
                phase if phase.is_experiment() => self.main_block(state)?,
                _ => self.debrief(state)?,
            };
            if flow == Flow::Quit {
                warn!(phase = self.phase.label(), "session aborted");
                return Ok(SessionOutcome::Aborted);
            }
            match self.phase.next() {
                Some(next) => self.phase = next,
                None => return Ok(SessionOutcome::Completed),
            }
        }
    }

    fn random_orientation(&mut self) -> Orientation {
        Orientation::ALL[self.rng.random_range(0..Orientation::ALL.len())]
    }

    fn welcome(&mut self) -> Result<Flow> {
        self.apparatus.instruct(WELCOME_TEXT, MessageWait::Key)
    }

    fn practice(&mut self) -> Result<Flow> {
        if self.apparatus.instruct(PRACTICE_TEXT, MessageWait::Key)? == Flow::Quit {
            return Ok(Flow::Quit);
        }
        for trial in 0..self.config.practice_trials {
            let target = self.random_orientation();
            let congruent = self
                .rng
                .random_bool(self.config.plan.prime_match_probability);
            let prime = target.prime_for(congruent);
            let sequence = SequenceBuilder::new(&self.config.timings, &self.display).practice(
                target,
                self.config.practice_soa_ms,
                prime,
            );
            self.apparatus.present(&sequence)?;
            let tilt = or_quit!(self.apparatus.tilt_choice());
            let detected = or_quit!(self.apparatus.detection());
            let confidence = or_quit!(self.apparatus.confidence());
            let prime_correct = self.config.keys.orientation_for(tilt.key) == Some(prime);
            debug!(
                trial,
                detected,
                confidence,
                rt_ms = tilt.rt_ms,
                congruent,
                prime_correct,
                "practice trial"
            );
        }
        Ok(Flow::Continue)
    }

    fn detection_practice(&mut self) -> Result<Flow> {
        if self.apparatus.instruct(DETECTION_TEXT, MessageWait::Key)? == Flow::Quit {
            return Ok(Flow::Quit);
        }
        let bounds = self.config.bounds;
        let step = self.config.detection_step_ms;
        let mut soa = bounds.clamp(self.config.detection_start_ms);
        for trial in 0..self.config.detection_practice_trials {
            let is_catch = self
                .rng
                .random_bool(self.config.detection_catch_probability);
            let target = self.random_orientation();
            let sequence = SequenceBuilder::new(&self.config.timings, &self.display)
                .detection((!is_catch).then_some(target), soa);
            self.apparatus.present(&sequence)?;
            let detected = or_quit!(self.apparatus.detection());

            if detected == is_catch {
                let wait = MessageWait::Millis(self.config.feedback_ms);
                if self.apparatus.instruct(INCORRECT_TEXT, wait)? == Flow::Quit {
                    return Ok(Flow::Quit);
                }
            }
            if !is_catch {
                soa = bounds.clamp(if detected { soa - step } else { soa + step });
            }
            debug!(trial, is_catch, detected, next_soa = soa, "detection practice trial");
        }
        Ok(Flow::Continue)
    }

    /// Runs the controller until it is done, collapses, or the participant quits.
    fn drive_controller(&mut self, controller: &mut dyn AdaptiveController) -> Result<Flow> {
        while !controller.is_done() {
            let level = match controller.next_level() {
                Ok(level) => level,
                Err(err @ AdaptiveError::NumericInstability { .. }) => {
                    error!(error = %err, "calibration stopped");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            let target = self.random_orientation();
            let sequence = SequenceBuilder::new(&self.config.timings, &self.display)
                .detection(Some(target), level);
            self.apparatus.present(&sequence)?;
            let detected = or_quit!(self.apparatus.detection());
            match controller.add_response(detected) {
                Ok(()) => {}
                Err(err @ AdaptiveError::NumericInstability { .. }) => {
                    error!(error = %err, level, "calibration stopped");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
            debug!(
                trial = controller.trials_completed(),
                level,
                shown_frames = sequence.target_soa_frames(),
                detected,
                "calibration trial"
            );
        }
        Ok(Flow::Continue)
    }

    fn calibration(&mut self, state: &mut SessionState) -> Result<Flow> {
        let frame_ms = self.display.frame_ms();
        let mut controller_config = self.config.controller.clone();
        if self.config.quantize_start {
            controller_config = controller_config.with_quantum(frame_ms);
        }
        if let Some(frames) = self.config.calibration_step_frames {
            controller_config = controller_config.with_frame_steps(frames, frame_ms);
        }
        let controller = state
            .controller
            .insert(controller_config.build(self.config.bounds)?);

        let flow = match self.apparatus.instruct(CALIBRATION_TEXT, MessageWait::Key)? {
            Flow::Quit => Flow::Quit,
            Flow::Continue => self.drive_controller(&mut **controller)?,
        };
        if flow == Flow::Quit {
            controller.abort();
            return Ok(Flow::Quit);
        }

        let resolved = resolve_threshold(
            &**controller,
            &self.config.fit,
            self.config.bounds,
            &mut self.apparatus,
        );
        match resolved {
            Ok(estimate) => {
                info!(
                    threshold = estimate.level,
                    source = ?estimate.source,
                    "threshold resolved"
                );
                state.threshold = Some(estimate);
                Ok(Flow::Continue)
            }
            Err(ExperimentError::NoThreshold(reason)) => {
                error!(%reason, "no threshold available, ending session");
                Ok(Flow::Quit)
            }
            Err(err) => Err(err),
        }
    }

    fn main_block(&mut self, state: &mut SessionState) -> Result<Flow> {
        let threshold: Level = state
            .threshold
            .as_ref()
            .map(|estimate| estimate.level)
            .ok_or_else(|| ExperimentError::NoThreshold("calibration did not finish".into()))?;
        let trials = TrialPlanner::new(self.config.bounds).build_trials(
            threshold,
            &self.config.plan,
            &mut self.rng,
        )?;
        state.planned = trials.len();

        if self.apparatus.instruct(EXPERIMENT_TEXT, MessageWait::Key)? == Flow::Quit {
            return Ok(Flow::Quit);
        }
        let (delay_lo, delay_hi) = self.config.timings.response_delay_ms;
        let (iti_lo, iti_hi) = self.config.timings.iti_ms;
        for (index, trial) in trials.iter().enumerate() {
            let target = self.random_orientation();
            let delay = self.rng.random_range(delay_lo..delay_hi) as f64;
            let sequence = SequenceBuilder::new(&self.config.timings, &self.display)
                .main_trial(trial, target, delay);
            self.apparatus.present(&sequence)?;

            let tilt = or_quit!(self.apparatus.tilt_choice());
            let detected = or_quit!(self.apparatus.detection());
            let confidence = or_quit!(self.apparatus.confidence());

            let prime = target.prime_for(trial.prime_congruent);
            let prime_correct = trial
                .prime_shown
                .then(|| self.config.keys.orientation_for(tilt.key) == Some(prime));
            let record = TrialRecord {
                subj: self.session.participant.clone(),
                trial: index,
                soa_ms: trial.level,
                catch_trial: trial.is_catch,
                detect_yn: detected,
                confidence,
                rt_prime_ms: tilt.rt_ms,
                prime_shown: trial.prime_shown,
                prime_congruent: trial.prime_congruent,
                prime_correct,
                threshold,
            };
            self.sink.write_record(&record)?;
            debug!(
                trial = index,
                soa_ms = trial.level,
                catch = trial.is_catch,
                detected,
                confidence,
                rt_ms = tilt.rt_ms,
                ?prime_correct,
                "main trial"
            );
            state.records.push(record);

            let iti = self.rng.random_range(iti_lo..iti_hi) as f64;
            let pause = SequenceBuilder::new(&self.config.timings, &self.display).inter_trial(iti);
            self.apparatus.present(&pause)?;
        }
        Ok(Flow::Continue)
    }

    fn debrief(&mut self, state: &SessionState) -> Result<Flow> {
        let stats = DebriefStats::from_records(&state.records);
        info!(
            trials = state.records.len(),
            hit_rate = ?stats.hit_rate,
            false_alarm_rate = ?stats.false_alarm_rate,
            mean_prime_rt_ms = ?stats.mean_prime_rt_ms,
            prime_accuracy = ?stats.prime_accuracy,
            "debrief"
        );
        // quitting from the closing screen still counts as a finished session
        self.apparatus.instruct(DEBRIEF_TEXT, MessageWait::Key)?;
        Ok(Flow::Continue)
    }

    fn finish(
        self,
        state: SessionState,
        outcome: SessionOutcome,
        error: Option<&ExperimentError>,
    ) -> RunReport {
        let (controller_name, calibration_history, reversals) = match &state.controller {
            Some(c) => (c.name().to_string(), c.history().to_vec(), c.reversals().to_vec()),
            None => (String::new(), Vec::new(), Vec::new()),
        };
        let summary = SessionSummary {
            session: self.session.clone(),
            outcome,
            last_phase: self.phase.label().to_string(),
            controller: controller_name,
            calibration_history,
            reversals,
            threshold: state.threshold.clone(),
            main_trials_planned: state.planned,
            main_trials_recorded: state.records.len(),
            debrief: DebriefStats::from_records(&state.records),
            error: error.map(ToString::to_string),
        };
        info!(
            outcome = ?outcome,
            phase = self.phase.label(),
            recorded = summary.main_trials_recorded,
            "session finished"
        );
        RunReport {
            summary,
            controller: state.controller,
            records: state.records,
        }
    }
}
