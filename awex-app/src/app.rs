use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use awex_adaptive::{BayesConfig, ControllerConfig, StaircaseConfig};
use awex_experiment::{
    DelimitedWriter, ExperimentConfig, ExperimentRunner, ObserverProfile, RunOutcome, SessionInfo,
    SimulatedObserver,
};
use awex_timing::{HighPrecisionTimer, Timer};
use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::terminal::TerminalApparatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ControllerKind {
    Staircase,
    Bayes,
}

#[derive(Debug, Parser)]
#[command(name = "awex")]
#[command(about = "Adaptive threshold estimation for a masked grating experiment", long_about = None)]
pub struct Cli {
    /// Experiment configuration (JSON); defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, default_value = "anon")]
    pub participant: String,

    #[arg(short, long, default_value = "001")]
    pub run: String,

    /// RNG seed; a random one is drawn and logged when omitted.
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(short, long, default_value = "data")]
    pub out_dir: PathBuf,

    /// Overrides the controller kind of the configuration file.
    #[arg(long, value_enum)]
    pub controller: Option<ControllerKind>,

    /// Answer with a simulated observer instead of the terminal.
    #[arg(long)]
    pub simulate: bool,

    /// Terminal mode only: do not wait out presentation durations.
    #[arg(long)]
    pub skip_waits: bool,

    /// Threshold of the simulated observer in ms.
    #[arg(long, default_value_t = 90.0)]
    pub sim_threshold_ms: f64,

    /// Nominal display refresh rate used for frame rounding.
    #[arg(long, default_value_t = 60.0)]
    pub refresh_hz: f64,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub struct App {
    cli: Cli,
    config: ExperimentConfig,
}

impl App {
    pub fn new(cli: Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => ExperimentConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ExperimentConfig::default(),
        };
        if let Some(kind) = cli.controller {
            config.controller = override_controller(config.controller, kind);
        }
        config.validate()?;
        if !(cli.refresh_hz.is_finite() && cli.refresh_hz > 0.0) {
            anyhow::bail!("refresh rate must be positive, got {}", cli.refresh_hz);
        }
        if cli.simulate {
            sim_profile(&cli)
                .validate()
                .context("invalid simulated observer")?;
        }
        Ok(Self { cli, config })
    }

    pub fn run(self) -> Result<RunOutcome> {
        let seed = self.cli.seed.unwrap_or_else(rand::random);
        let session = SessionInfo {
            participant: self.cli.participant.clone(),
            run: self.cli.run.clone(),
            date: chrono::Local::now().format("%Y-%m-%d_%H-%M").to_string(),
        };
        info!(
            seed,
            controller = controller_kind_name(&self.config.controller),
            simulate = self.cli.simulate,
            "starting session"
        );

        fs::create_dir_all(&self.cli.out_dir)
            .with_context(|| format!("creating {}", self.cli.out_dir.display()))?;
        let stem = session.file_stem();
        let csv_path = self.cli.out_dir.join(format!("{stem}.csv"));
        let json_path = self.cli.out_dir.join(format!("{stem}.json"));
        let mut writer = DelimitedWriter::create(&csv_path)
            .with_context(|| format!("creating {}", csv_path.display()))?;

        let timer = HighPrecisionTimer::with_nominal_refresh(self.cli.refresh_hz);
        let rng = ChaCha8Rng::seed_from_u64(seed);
        let keys = self.config.keys;

        let outcome = if self.cli.simulate {
            let observer = SimulatedObserver::new(
                sim_profile(&self.cli),
                keys,
                ChaCha8Rng::seed_from_u64(seed ^ 0x5eed),
            )?;
            ExperimentRunner::new(self.config, session, observer, timer, &mut writer, rng)?.run()
        } else {
            let mut terminal =
                TerminalApparatus::new(io::stdin().lock(), io::stdout(), keys, timer.clone());
            if self.cli.skip_waits {
                terminal = terminal.without_waits();
            }
            let outcome =
                ExperimentRunner::new(self.config, session, &mut terminal, timer, &mut writer, rng)?
                    .run();
            let stats = terminal.timer().calibration_stats();
            info!(
                frames = stats.samples,
                frame_ms = stats.average_frame_ms(),
                jitter_ms = stats.jitter_ns / 1_000_000.0,
                fps = stats.effective_fps,
                "presentation timing"
            );
            outcome
        };

        outcome.report().summary.write_json(&json_path)?;
        report_paths(&csv_path, &json_path, writer.rows());
        Ok(outcome)
    }
}

fn sim_profile(cli: &Cli) -> ObserverProfile {
    ObserverProfile {
        threshold_ms: cli.sim_threshold_ms,
        ..ObserverProfile::default()
    }
}

fn report_paths(csv: &Path, json: &Path, rows: usize) {
    info!(
        csv = %csv.display(),
        summary = %json.display(),
        rows,
        "results saved"
    );
}

fn controller_kind_name(config: &ControllerConfig) -> &'static str {
    match config {
        ControllerConfig::Staircase(_) => "staircase",
        ControllerConfig::Bayes(_) => "bayes",
    }
}

/// Keeps the configured parameters when the kind already matches.
fn override_controller(current: ControllerConfig, kind: ControllerKind) -> ControllerConfig {
    match (current, kind) {
        (c @ ControllerConfig::Staircase(_), ControllerKind::Staircase) => c,
        (c @ ControllerConfig::Bayes(_), ControllerKind::Bayes) => c,
        (_, ControllerKind::Staircase) => ControllerConfig::Staircase(StaircaseConfig::default()),
        (_, ControllerKind::Bayes) => ControllerConfig::Bayes(BayesConfig::default()),
    }
}
