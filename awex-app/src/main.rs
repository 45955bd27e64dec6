mod app;
mod logging;
mod terminal;

use app::{App, Cli};
use awex_experiment::RunOutcome;
use clap::Parser;
use tracing::warn;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level);

    match App::new(cli)?.run()? {
        RunOutcome::Completed(_) => Ok(()),
        RunOutcome::Aborted(_) => {
            warn!("session ended early, partial data kept");
            Ok(())
        }
        RunOutcome::Failed { error, .. } => {
            Err(anyhow::Error::new(error).context("session failed, partial data kept"))
        }
    }
}
