use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use kettle::config::Config;
use kettle::console::{LinePrompt, PlainPrompt};
use kettle::reporter::Reporter;
use kettle::supervisor::{self, Supervisor};

/// Interactive test shell with a warm, forked test environment.
#[derive(Debug, Parser)]
#[command(name = "kettle", version, about)]
struct Cli {
    /// Verbose logging and backtraces for internal errors.
    #[arg(long)]
    trace: bool,

    /// Exit after running COMMAND.
    #[arg(long)]
    once: bool,

    /// Stop each run at the first failure.
    #[arg(long)]
    fail_fast: bool,

    /// Extra config file, applied after ~/.kettle.yml and ./.kettle.yml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Command to run as soon as the environment is loaded.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("kettle: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    config.trace |= cli.trace;
    config.fail_fast |= cli.fail_fast;
    config.once = cli.once;
    config.run_command = shell_words::join(&cli.command);

    init_tracing(config.trace);

    let reporter = Reporter::new(config.trace);
    if let Some(problem) = config.validation_errors().into_iter().next() {
        reporter.error(problem);
        return Ok(1);
    }
    reporter.welcome();

    let slot = supervisor::worker_slot();
    let report = if std::io::stdin().is_terminal() {
        let prompt = LinePrompt::new(&config, slot.clone()).context("starting the console")?;
        Supervisor::new(config, prompt, slot).run()?
    } else {
        Supervisor::new(config, PlainPrompt::stdin(), slot).run()?
    };

    if report.exit_code == 0 {
        reporter.goodbye();
    }
    Ok(if report.exit_code == 0 { 0 } else { 1 })
}

fn init_tracing(trace: bool) {
    tracing_subscriber::fmt()
        .with_max_level(if trace { Level::TRACE } else { Level::WARN })
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
