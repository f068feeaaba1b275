//! The supervisor: the operator-facing parent process.
//!
//! It owns the session lifecycle
//! `Spawning -> AwaitEnvironmentLoad -> Interactive -> (Reloading -> Spawning | Exiting)`,
//! keeps at most one worker alive at a time, and turns each operator
//! command into at most one worker request.

pub mod commands;
pub mod process;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use nix::unistd::Pid;

use crate::config::Config;
use crate::console::{Prompt, PROMPT};
use crate::error::{KettleError, Result};
use crate::ipc::{Request, Response};
use crate::reporter::Reporter;
use crate::result::{RunWarning, TestRunResult, Timing};
use crate::signals;

use commands::Command;
use process::{WorkerProcess, WorkerState};

/// The live worker, shared with the completion helper.
pub type SharedWorker = Rc<RefCell<Option<WorkerProcess>>>;

pub fn worker_slot() -> SharedWorker {
    Rc::new(RefCell::new(None))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Spawning,
    AwaitEnvironmentLoad,
    EnvironmentFailed,
    Interactive,
    Reloading,
    Exiting,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub exit_code: i32,
    /// Every worker spawned, in order. All of them have been reaped.
    pub worker_pids: Vec<Pid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Continue,
    Reload,
    Exit,
}

pub struct Supervisor<P> {
    config: Config,
    prompt: P,
    reporter: Reporter,
    worker: SharedWorker,
    state: SessionState,
    last_result: Option<TestRunResult>,
    last_timings: Vec<Timing>,
    worker_pids: Vec<Pid>,
    spawn: fn(&Config) -> Result<WorkerProcess>,
}

impl<P: Prompt> Supervisor<P> {
    pub fn new(config: Config, prompt: P, worker: SharedWorker) -> Self {
        let reporter = Reporter::new(config.trace);
        Self {
            config,
            prompt,
            reporter,
            worker,
            state: SessionState::Spawning,
            last_result: None,
            last_timings: Vec::new(),
            worker_pids: Vec::new(),
            spawn: WorkerProcess::spawn,
        }
    }

    /// Replace how workers are started, e.g. with a test double.
    pub fn with_spawner(mut self, spawn: fn(&Config) -> Result<WorkerProcess>) -> Self {
        self.spawn = spawn;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_result(&self) -> Option<&TestRunResult> {
        self.last_result.as_ref()
    }

    pub fn last_timings(&self) -> &[Timing] {
        &self.last_timings
    }

    /// Run the session until exit or environment failure.
    pub fn run(&mut self) -> Result<SessionReport> {
        let mut initial = Some(std::mem::take(&mut self.config.run_command))
            .filter(|command| !command.trim().is_empty());

        if let Err(e) = signals::install_console_handlers() {
            tracing::warn!("could not install console signal handlers: {}", e);
        }

        let exit_code = loop {
            self.transition(SessionState::Spawning);
            signals::suppress_interrupts()?;
            self.spawn_worker()?;

            self.transition(SessionState::AwaitEnvironmentLoad);
            if !self.await_environment_load()? {
                self.transition(SessionState::EnvironmentFailed);
                self.teardown()?;
                break 1;
            }

            signals::catch_interrupts()?;
            self.transition(SessionState::Interactive);
            match self.interact(initial.take())? {
                Next::Reload => {
                    self.transition(SessionState::Reloading);
                    self.teardown()?;
                    self.reporter.info("Reloading the test environment...");
                }
                Next::Exit | Next::Continue => {
                    self.transition(SessionState::Exiting);
                    self.teardown()?;
                    break 0;
                }
            }
        };

        if let Err(e) = self.prompt.save_history() {
            tracing::warn!("could not save history: {}", e);
        }
        signals::restore_defaults()?;

        Ok(SessionReport {
            exit_code,
            worker_pids: self.worker_pids.clone(),
        })
    }

    fn transition(&mut self, state: SessionState) {
        tracing::debug!(from = ?self.state, to = ?state, "session transition");
        self.state = state;
    }

    fn spawn_worker(&mut self) -> Result<()> {
        let mut slot = self.worker.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            return Err(KettleError::WorkerAlreadyRunning {
                pid: existing.pid().as_raw(),
            });
        }
        let worker = (self.spawn)(&self.config)?;
        self.worker_pids.push(worker.pid());
        *slot = Some(worker);
        Ok(())
    }

    /// True once the worker reports a loaded environment.
    fn await_environment_load(&mut self) -> Result<bool> {
        self.reporter.info("Loading environment...");
        let timeout = self.config.load_timeout_secs.map(Duration::from_secs);

        let outcome = match self.worker.borrow_mut().as_mut() {
            Some(worker) => worker.load_environment(timeout),
            None => Err(KettleError::ChannelClosed),
        };

        match outcome {
            Ok(report) => {
                self.reporter.environment(&report);
                Ok(report.loaded)
            }
            Err(KettleError::LoadTimeout { timeout_secs }) => {
                self.reporter.error(format!(
                    "Could not load the environment within {}s. Exiting.",
                    timeout_secs
                ));
                Ok(false)
            }
            Err(KettleError::ChannelClosed) => {
                self.reporter
                    .error("The test worker exited while loading the environment.");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn interact(&mut self, initial: Option<String>) -> Result<Next> {
        if let Some(command) = initial {
            let next = self.execute_line(&command)?;
            if next != Next::Continue || self.config.once {
                return Ok(next);
            }
        } else if self.config.once {
            return Ok(Next::Exit);
        }

        loop {
            let Some(line) = self.prompt.read_line(PROMPT)? else {
                return Ok(Next::Exit);
            };
            self.prompt.add_history(&line);
            match self.execute_line(&line)? {
                Next::Continue => {}
                next => return Ok(next),
            }
        }
    }

    fn execute_line(&mut self, line: &str) -> Result<Next> {
        let command = match commands::parse(line, &self.config.file_set_names()) {
            Ok(command) => command,
            Err(e) => {
                self.reporter.error(e);
                return Ok(Next::Continue);
            }
        };

        match command {
            Command::Empty => Ok(Next::Continue),
            Command::Exit => Ok(Next::Exit),
            Command::Reload => Ok(Next::Reload),
            Command::Help => {
                self.reporter.help();
                Ok(Next::Continue)
            }
            Command::Shell(command) => {
                self.shell(&command);
                Ok(Next::Continue)
            }
            Command::Remote(request) => self.remote(request),
        }
    }

    fn shell(&self, command: &str) {
        match std::process::Command::new("sh").arg("-c").arg(command).status() {
            Ok(status) if status.success() => self.reporter.exclaim(format!(
                "Command exited with status code: {}",
                status.code().unwrap_or(0)
            )),
            Ok(status) => self.reporter.error(format!(
                "Command exited with status code: {}",
                status
                    .code()
                    .map_or_else(|| "none".to_string(), |c| c.to_string())
            )),
            Err(e) => self.reporter.error(format!("Could not run `{}`: {}", command, e)),
        }
    }

    fn remote(&mut self, request: Request) -> Result<Next> {
        if matches!(
            request,
            Request::RunAllTests { .. } | Request::RunFileSet { .. }
        ) {
            self.reporter.info("Running tests...");
        }

        let response = match self.worker.borrow_mut().as_mut() {
            Some(worker) => worker.call(&request),
            None => Err(KettleError::ChannelClosed),
        };

        match response {
            Ok(response) => {
                self.present(response);
                Ok(Next::Continue)
            }
            Err(KettleError::ChannelClosed) => {
                self.reporter
                    .error("The test worker exited unexpectedly. Reloading.");
                Ok(Next::Reload)
            }
            Err(e) => {
                self.reporter.error(format!("An error occurred: {}", e));
                Ok(Next::Continue)
            }
        }
    }

    fn present(&mut self, response: Response) {
        match response {
            Response::TestRun(result) => {
                self.reporter.test_run(&result);
                if !matches!(result.warning, Some(RunWarning::NoMatchingFiles { .. })) {
                    self.last_result = Some(result);
                }
            }
            Response::Timings(timings) => {
                self.reporter.timings(&timings);
                self.last_timings = timings;
            }
            Response::Notice(text) => self.reporter.info(text),
            Response::Completions(names) => self.reporter.completions(&names),
            Response::Variable { name, value } => self.reporter.variable(&name, &value),
            Response::Info(info) => self.reporter.run_info(&info),
            Response::Environment(report) => self.reporter.environment(&report),
            Response::Stopped => {}
            Response::Failure { message, backtrace } => {
                self.reporter.error(format!("An error occurred: {}", message));
                self.reporter.trace_lines(&backtrace);
            }
        }
    }

    /// Stop and reap the current worker, if any.
    fn teardown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.borrow_mut().take() else {
            return Ok(());
        };
        let pid = worker.pid();
        let exit = if worker.state() == WorkerState::EnvironmentLoading {
            worker.kill()?
        } else {
            worker.shutdown()?
        };
        tracing::debug!(%pid, %exit, "worker stopped");
        Ok(())
    }
}
