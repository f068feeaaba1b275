//! Operator-facing output.

use std::fmt::Display;

use chrono::Local;
use owo_colors::{OwoColorize, Stream::Stdout};

use crate::ipc::{EnvironmentReport, RunInfo};
use crate::result::{FailureKind, RunWarning, TestRunResult, Timing};
use crate::supervisor::commands::HELP;

/// Durations above this are highlighted in timing listings.
const SLOW_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    trace: bool,
}

impl Reporter {
    pub fn new(trace: bool) -> Self {
        Self { trace }
    }

    pub fn info(&self, message: impl Display) {
        println!("{}", message);
    }

    pub fn exclaim(&self, message: impl Display) {
        println!("{}", message.if_supports_color(Stdout, |m| m.green()));
    }

    pub fn warn(&self, message: impl Display) {
        println!("{}", message.if_supports_color(Stdout, |m| m.yellow()));
    }

    pub fn error(&self, message: impl Display) {
        println!("{}", message.if_supports_color(Stdout, |m| m.red()));
    }

    /// Backtrace-style detail, shown only in trace mode.
    pub fn trace_lines(&self, lines: &[String]) {
        if !self.trace {
            return;
        }
        for line in lines {
            println!("  {}", line.if_supports_color(Stdout, |l| l.dimmed()));
        }
    }

    pub fn welcome(&self) {
        self.exclaim("Welcome to kettle. Type `help` for the available commands.");
    }

    pub fn goodbye(&self) {
        self.info("Goodbye.");
    }

    pub fn help(&self) {
        self.info(HELP);
    }

    pub fn environment(&self, report: &EnvironmentReport) {
        if report.loaded {
            self.exclaim(format!(
                "Environment loaded in {:.6}s ({} framework, {} files preloaded).",
                report.elapsed_secs,
                report.framework.as_deref().unwrap_or("unknown"),
                report.preloaded
            ));
        } else {
            self.error(format!(
                "Couldn't load the test environment: {}",
                report.error.as_deref().unwrap_or("unknown error")
            ));
            self.trace_lines(&report.details);
        }
    }

    pub fn test_run(&self, result: &TestRunResult) {
        match &result.warning {
            Some(RunWarning::NoMatchingFiles { patterns }) => {
                self.warn(format!(
                    "No test files match your requested test set: {}.",
                    patterns.join(", ")
                ));
                self.warn("Skipping execution.");
                return;
            }
            Some(RunWarning::ExecutorCrashed { reason }) => {
                self.error(format!("The test results could not be processed: {}", reason));
            }
            Some(RunWarning::Aborted { reason }) => {
                self.error(format!("The test run was aborted: {}", reason));
            }
            Some(RunWarning::Interrupted) => {
                self.warn("Run interrupted; showing the tests that finished.");
            }
            None => {}
        }

        for (n, failure) in result.failures.iter().enumerate() {
            let label = match failure.kind {
                FailureKind::Failure => "Failure",
                FailureKind::Error => "Error",
            };
            println!();
            println!(
                "  {}) {}: {}#{} [{}]",
                n + 1,
                label.if_supports_color(Stdout, |l| l.red()),
                failure.suite,
                failure.method,
                failure.element_id.if_supports_color(Stdout, |id| id.magenta())
            );
            println!("     {}", failure.message);
            for line in &failure.backtrace {
                println!("       {}", line);
            }
        }

        let counts = &result.counts;
        let summary = format!(
            "{} tests, {} passes, {} failures, {} errors, {} skips",
            counts.total(),
            counts.passes,
            counts.failures,
            counts.errors,
            counts.skips
        );
        println!();
        if result.is_success() {
            self.exclaim(summary);
        } else {
            self.error(summary);
        }

        let finished = result.finished_at.with_timezone(&Local);
        self.info(format!(
            "Tests ran in {:.6}s. Finished at {}.",
            result.elapsed_secs,
            finished.format("%Y-%m-%d %-I:%M:%S %p")
        ));
    }

    pub fn timings(&self, timings: &[Timing]) {
        if timings.is_empty() {
            self.info("No timings recorded yet. Run some tests first.");
            return;
        }
        for timing in timings {
            let secs = format!("{:>10.6}s", timing.duration_secs);
            if timing.duration_secs > SLOW_SECS {
                print!("{}", secs.if_supports_color(Stdout, |s| s.red()));
            } else {
                print!("{}", secs);
            }
            println!(
                "  {} [{}]",
                timing.name(),
                timing.element_id.if_supports_color(Stdout, |id| id.magenta())
            );
        }
    }

    pub fn completions(&self, names: &[String]) {
        for name in names {
            self.info(name);
        }
    }

    pub fn variable(&self, name: &str, value: &str) {
        self.exclaim(format!("{} is {}", name, value));
    }

    pub fn run_info(&self, info: &RunInfo) {
        self.info(format!("worker pid:      {}", info.pid));
        self.info(format!("framework:       {}", info.framework));
        self.info(format!(
            "loaded at:       {} ({:.6}s)",
            info.loaded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            info.load_secs
        ));
        self.info(format!("file sets:       {}", info.file_sets.join(", ")));
        self.info(format!("known tests:     {}", info.known_elements));
        self.info(format!(
            "fail fast:       {}",
            if info.fail_fast { "on" } else { "off" }
        ));
        if let Some(counts) = &info.last_run {
            self.info(format!(
                "last run:        {} tests, {} failures, {} errors",
                counts.total(),
                counts.failures,
                counts.errors
            ));
        }
    }
}
