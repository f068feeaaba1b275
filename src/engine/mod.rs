//! Test execution in a disposable executor process.
//!
//! Every run forks a fresh executor from the worker. The executor inherits
//! the loaded environment, runs exactly one batch, writes its result to a
//! private channel and exits. Whatever a test does to process state dies
//! with the executor.

pub mod context;
pub mod filter;

use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::fileset;
use crate::error::{KettleError, Result};
use crate::ipc::channel::{Channel, PipePair, Role};
use crate::process::{self, Forked};
use crate::result::{ElementIndex, RunWarning, TestRunResult};
use crate::signals;
use crate::worker::environment::{Environment, HookPoint};

use context::RunContext;
use filter::ElementFilter;

/// What to run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Globs selecting test files.
    pub patterns: Vec<String>,
    pub filter: ElementFilter,
    pub fail_fast: bool,
}

pub struct TestEngine<'a> {
    environment: &'a Environment,
    inherited: &'a [RawFd],
}

impl<'a> TestEngine<'a> {
    pub fn new(environment: &'a Environment) -> Self {
        Self {
            environment,
            inherited: &[],
        }
    }

    /// Descriptors the executor closes before running anything, e.g. the
    /// worker's end of the supervisor channel.
    pub fn closing_in_executor(mut self, fds: &'a [RawFd]) -> Self {
        self.inherited = fds;
        self
    }

    /// Resolve the plan's files and run them in a new executor.
    ///
    /// `elements` seeds the executor's index; the returned result carries
    /// the index as it stood when the run ended.
    pub fn run(&self, elements: &ElementIndex, plan: RunPlan) -> Result<TestRunResult> {
        let paths = fileset::resolve(&plan.patterns)?;
        if paths.is_empty() {
            tracing::warn!(patterns = ?plan.patterns, "no test files matched");
            return Ok(TestRunResult::no_matching_files(plan.patterns, elements.clone()));
        }
        tracing::debug!(files = paths.len(), fail_fast = plan.fail_fast, "starting executor");

        let started = Instant::now();
        let pipes = PipePair::new()?;
        let pid = match process::fork()? {
            Forked::Child => {
                close_inherited(self.inherited);
                let executor = Executor {
                    environment: self.environment,
                    elements: elements.clone(),
                    plan,
                    paths,
                };
                process::run_child(|| executor.run(pipes.bind(Role::Callee)))
            }
            Forked::Parent(pid) => pid,
        };

        // Read before reaping: a large payload would otherwise block the
        // executor on a full pipe while we wait for it to exit.
        let mut channel = pipes.bind(Role::Caller);
        let payload = channel.receive::<TestRunResult>();
        drop(channel);
        let exit = process::wait_for(pid)?;
        tracing::debug!(%pid, %exit, "executor finished");

        let mut result = match payload {
            Ok(Some(result)) => result,
            Ok(None) => crashed(elements, format!("executor ended without a result ({})", exit)),
            Err(e) => crashed(elements, format!("unreadable executor result: {}", e)),
        };
        result.elapsed_secs = started.elapsed().as_secs_f64();
        Ok(result)
    }
}

/// The executor must not keep the supervisor waiting on a dead worker.
fn close_inherited(fds: &[RawFd]) {
    for &fd in fds {
        if let Err(e) = nix::unistd::close(fd) {
            tracing::debug!(fd, "could not close inherited descriptor: {}", e);
        }
    }
}

fn crashed(elements: &ElementIndex, reason: String) -> TestRunResult {
    tracing::error!("{}", KettleError::ExecutorCrash { reason: reason.clone() });
    TestRunResult::empty(elements.clone()).with_warning(RunWarning::ExecutorCrashed { reason })
}

/// One batch inside the executor process. Consumed by [`Executor::run`].
struct Executor<'a> {
    environment: &'a Environment,
    elements: ElementIndex,
    plan: RunPlan,
    paths: Vec<PathBuf>,
}

impl Executor<'_> {
    fn run(self, mut channel: Channel) -> i32 {
        if let Err(e) = signals::flag_interrupts() {
            tracing::warn!("could not install interrupt handler: {}", e);
        }

        let mut ctx = RunContext::new(self.elements, self.plan.filter, self.plan.fail_fast)
            .with_interrupt_check(signals::interrupted)
            .with_progress(io::stdout());

        let result = match self.environment.run_hook(HookPoint::BeforeTestRun) {
            Err(e) => ctx.abort(e.to_string()),
            Ok(()) => match self.environment.framework().execute(&self.paths, &mut ctx) {
                Ok(()) => ctx.finish(),
                Err(e) => ctx.abort(e.to_string()),
            },
        };

        match channel.send(&result) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("could not deliver test results: {}", e);
                1
            }
        }
    }
}
