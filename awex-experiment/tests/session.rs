use awex_adaptive::{BayesConfig, ControllerConfig, StaircaseConfig};
use awex_core::{KeyMapping, LevelBounds};
use awex_experiment::{
    DelimitedWriter, ExperimentConfig, ExperimentRunner, HEADER, ObserverProfile, SessionInfo,
    SessionOutcome, SessionSummary, SimulatedObserver, ThresholdSource, TrialPlan,
};
use awex_timing::FixedRefresh;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn session() -> SessionInfo {
    SessionInfo {
        participant: "sim01".into(),
        run: "001".into(),
        date: "2026-10-19_10-30".into(),
    }
}

fn config(controller: ControllerConfig) -> ExperimentConfig {
    ExperimentConfig {
        practice_trials: 2,
        detection_practice_trials: 4,
        controller,
        plan: TrialPlan {
            repeats_per_level: 3,
            catch_per_level: 1,
            prime_absent_per_level: 0,
            ..TrialPlan::default()
        },
        ..ExperimentConfig::default()
    }
}

fn observer(seed: u64) -> SimulatedObserver<ChaCha8Rng> {
    SimulatedObserver::new(
        ObserverProfile {
            threshold_ms: 110.0,
            ..ObserverProfile::default()
        },
        KeyMapping::default(),
        ChaCha8Rng::seed_from_u64(seed),
    )
    .unwrap()
}

#[test]
fn simulated_session_writes_one_row_per_main_trial() {
    let mut writer = DelimitedWriter::new(Vec::new()).unwrap();
    let outcome = ExperimentRunner::new(
        config(ControllerConfig::Staircase(StaircaseConfig {
            n_trials: 30,
            ..StaircaseConfig::default()
        })),
        session(),
        observer(11),
        FixedRefresh::new(144.0),
        &mut writer,
        ChaCha8Rng::seed_from_u64(12),
    )
    .unwrap()
    .run();

    assert!(!outcome.is_aborted());
    let summary = &outcome.report().summary;
    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.main_trials_planned, 9 * 4);
    assert_eq!(summary.main_trials_recorded, 9 * 4);
    assert_eq!(summary.calibration_history.len(), 30);
    assert_eq!(summary.debrief.catch_trials, 9);

    let threshold = summary.threshold.as_ref().unwrap();
    assert_eq!(threshold.source, ThresholdSource::Controller);
    assert!(LevelBounds::default().contains(threshold.level));

    let csv = String::from_utf8(writer.into_inner()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 1 + 9 * 4);
    assert_eq!(lines[0], HEADER.join(","));
    for (i, line) in lines[1..].iter().enumerate() {
        let cells: Vec<&str> = line.split(',').collect();
        assert_eq!(cells.len(), HEADER.len());
        assert_eq!(cells[0], "sim01");
        assert_eq!(cells[1], i.to_string());
        assert!(matches!(cells[3], "True" | "False"));
        assert!(matches!(cells[9], "True" | "False" | "None"));
    }
}

#[test]
fn bayesian_controller_drives_the_same_session() {
    let mut writer = DelimitedWriter::new(Vec::new()).unwrap();
    let outcome = ExperimentRunner::new(
        config(ControllerConfig::Bayes(BayesConfig {
            n_trials: 25,
            ..BayesConfig::default()
        })),
        session(),
        observer(21),
        FixedRefresh::new(120.0),
        &mut writer,
        ChaCha8Rng::seed_from_u64(22),
    )
    .unwrap()
    .run();

    let report = outcome.report();
    assert_eq!(report.summary.controller, "bayes");
    assert!(report.summary.reversals.is_empty());
    assert_eq!(writer.rows(), 9 * 4);

    let json = serde_json::to_string(&report.summary).unwrap();
    let back: SessionSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back.controller, "bayes");
    assert_eq!(back.calibration_history.len(), 25);
    assert_eq!(back.main_trials_recorded, 9 * 4);
    assert_eq!(
        back.threshold.map(|t| t.source),
        Some(ThresholdSource::Controller)
    );
}

#[test]
fn quitting_mid_calibration_aborts_with_a_terminal_controller() {
    // 2 practice trials x 3 responses, 4 detection-practice responses, then 3 calibration trials
    let quit_at = 2 * 3 + 4 + 3;
    let mut writer = DelimitedWriter::new(Vec::new()).unwrap();
    let outcome = ExperimentRunner::new(
        config(ControllerConfig::default()),
        session(),
        observer(31).quit_after(quit_at),
        FixedRefresh::new(144.0),
        &mut writer,
        ChaCha8Rng::seed_from_u64(32),
    )
    .unwrap()
    .run();

    assert!(outcome.is_aborted());
    let report = outcome.into_report();
    assert_eq!(report.summary.outcome, SessionOutcome::Aborted);
    assert_eq!(report.summary.last_phase, "calibration");
    assert!(report.summary.threshold.is_none());

    let mut controller = report.controller.unwrap();
    assert!(controller.is_aborted());
    assert!(controller.is_done());
    assert_eq!(controller.trials_completed(), 3);
    assert!(controller.next_level().is_err());

    assert_eq!(writer.rows(), 0);
    let csv = String::from_utf8(writer.into_inner()).unwrap();
    assert_eq!(csv.lines().count(), 1);
}

#[test]
fn same_seeds_reproduce_the_session() {
    let run = || {
        let mut writer = DelimitedWriter::new(Vec::new()).unwrap();
        ExperimentRunner::new(
            config(ControllerConfig::default()),
            session(),
            observer(41),
            FixedRefresh::new(60.0),
            &mut writer,
            ChaCha8Rng::seed_from_u64(42),
        )
        .unwrap()
        .run();
        String::from_utf8(writer.into_inner()).unwrap()
    };
    assert_eq!(run(), run());
}
