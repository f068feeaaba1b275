//! The long-lived worker: loads the test environment once and serves
//! supervisor requests over its channel.

pub mod environment;

use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};

use crate::config::{fileset, Config};
use crate::engine::filter::{is_regex_literal, ElementFilter};
use crate::engine::{RunPlan, TestEngine};
use crate::error::{KettleError, Result};
use crate::framework::{self, Detector};
use crate::ipc::channel::Channel;
use crate::ipc::{EnvironmentReport, Request, Response, RunInfo};
use crate::result::{ElementIndex, RunWarning, TestRunResult};
use crate::signals;

use environment::Environment;

pub const NO_FAILURES_NOTICE: &str =
    "No tests failed in your last run, or you haven't run any tests in this session yet.";

pub struct Worker {
    config: Config,
    detect: Detector,
    /// Supervisor channel descriptors, closed in every executor.
    supervisor_fds: Vec<RawFd>,
    environment: Option<Environment>,
    elements: ElementIndex,
    last_result: Option<TestRunResult>,
    fail_fast: bool,
}

/// Serve requests until `stop` or until the supervisor goes away.
/// Returns the process exit code.
pub fn serve(channel: Channel, config: Config) -> i32 {
    if let Err(e) = signals::ignore_interrupts() {
        tracing::warn!("worker could not ignore interrupts: {}", e);
    }
    let mut worker = Worker::new(config);
    serve_with(channel, &mut worker)
}

pub fn serve_with(mut channel: Channel, worker: &mut Worker) -> i32 {
    worker.supervisor_fds = channel.raw_fds().to_vec();
    loop {
        let request = match channel.receive::<Request>() {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!("supervisor closed the channel");
                return 0;
            }
            Err(KettleError::Protocol { reason }) => {
                tracing::warn!("malformed request: {}", reason);
                let reply = Response::failure(format!("malformed request: {}", reason));
                if channel.send(&reply).is_err() {
                    return 0;
                }
                continue;
            }
            Err(e) => {
                tracing::error!("worker channel failed: {}", e);
                return 1;
            }
        };

        tracing::debug!(action = request.action(), "worker received request");
        if request == Request::Stop {
            if let Err(e) = channel.send(&Response::Stopped) {
                tracing::debug!("supervisor gone before stop was acknowledged: {}", e);
            }
            return 0;
        }

        let response = worker.dispatch(request);
        if let Err(e) = channel.send(&response) {
            tracing::debug!("supervisor went away: {}", e);
            return 0;
        }
    }
}

impl Worker {
    pub fn new(config: Config) -> Self {
        let fail_fast = config.fail_fast;
        Self {
            config,
            detect: framework::detect,
            supervisor_fds: Vec::new(),
            environment: None,
            elements: ElementIndex::new(),
            last_result: None,
            fail_fast,
        }
    }

    /// Replace how the test framework is chosen at environment load.
    pub fn with_detector(mut self, detect: Detector) -> Self {
        self.detect = detect;
        self
    }

    pub fn elements(&self) -> &ElementIndex {
        &self.elements
    }

    /// Handle one request. Errors and panics inside a handler become a
    /// `Failure` response and leave the worker serving.
    pub fn dispatch(&mut self, request: Request) -> Response {
        let action = request.action();
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(request))) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(action, "handler failed: {}", e);
                Response::Failure {
                    message: e.to_string(),
                    backtrace: error_chain(&e),
                }
            }
            Err(panic) => {
                let error = KettleError::Handler {
                    reason: format!("{} panicked: {}", action, panic_message(panic.as_ref())),
                };
                tracing::error!(action, "{}", error);
                Response::failure(error.to_string())
            }
        }
    }

    fn handle(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::LoadEnvironment => Ok(self.load_environment()),
            Request::RunFileSet { name } => self.run_file_set(&name),
            Request::RunAllTests { words } => self.run_all_tests(words),
            Request::RunFailed => self.run_failed(),
            Request::ShowPerformance { limit } => Ok(self.show_performance(limit)),
            Request::Autocomplete { prefix } => {
                Ok(Response::Completions(self.elements.complete(&prefix)))
            }
            Request::Set { name, value } => Ok(self.set(&name, value.as_deref())),
            Request::RunInfo => self.run_info(),
            Request::Stop => Ok(Response::Stopped),
        }
    }

    fn load_environment(&mut self) -> Response {
        if let Some(environment) = &self.environment {
            return Response::Environment(loaded_report(environment));
        }

        let started = std::time::Instant::now();
        match Environment::load(&self.config, self.detect) {
            Ok(environment) => {
                let report = loaded_report(&environment);
                self.environment = Some(environment);
                Response::Environment(report)
            }
            Err(e) => {
                tracing::error!("environment load failed: {}", e);
                Response::Environment(EnvironmentReport::failed(
                    e.to_string(),
                    error_chain(&e),
                    started.elapsed().as_secs_f64(),
                ))
            }
        }
    }

    fn run_file_set(&mut self, name: &str) -> Result<Response> {
        let patterns = self
            .config
            .file_set(name)
            .ok_or_else(|| KettleError::UnknownFileSet {
                name: name.to_string(),
            })?
            .to_vec();
        self.run(RunPlan {
            patterns,
            filter: ElementFilter::all(),
            fail_fast: self.fail_fast,
        })
    }

    /// Path-like words select files; every other word filters elements.
    fn run_all_tests(&mut self, words: Vec<String>) -> Result<Response> {
        let (globs, patterns): (Vec<String>, Vec<String>) = words
            .into_iter()
            .partition(|w| !is_regex_literal(w) && fileset::is_path_like(w));

        let globs = if globs.is_empty() {
            self.all_set()?
        } else {
            globs
        };
        self.run(RunPlan {
            patterns: globs,
            filter: ElementFilter::parse(&patterns)?,
            fail_fast: self.fail_fast,
        })
    }

    fn run_failed(&mut self) -> Result<Response> {
        let ids = self
            .last_result
            .as_ref()
            .map(TestRunResult::failed_ids)
            .unwrap_or_default();
        if ids.is_empty() {
            return Ok(Response::Notice(NO_FAILURES_NOTICE.into()));
        }
        self.run(RunPlan {
            patterns: self.all_set()?,
            filter: ElementFilter::ids(ids),
            fail_fast: self.fail_fast,
        })
    }

    fn show_performance(&self, limit: Option<usize>) -> Response {
        let timings = self
            .last_result
            .as_ref()
            .map(|r| r.slowest(limit))
            .unwrap_or_default();
        Response::Timings(timings)
    }

    fn set(&mut self, name: &str, value: Option<&str>) -> Response {
        match name {
            "fast" | "fail_fast" => {
                if let Some(value) = value {
                    match parse_switch(value) {
                        Some(on) => self.fail_fast = on,
                        None => {
                            return Response::Notice(format!(
                                "Can't set {} to `{}`; use on or off.",
                                name, value
                            ))
                        }
                    }
                }
                Response::Variable {
                    name: "fast".into(),
                    value: if self.fail_fast { "on" } else { "off" }.into(),
                }
            }
            other => Response::Notice(format!("Unknown variable `{}`.", other)),
        }
    }

    fn run_info(&self) -> Result<Response> {
        let environment = self.environment()?;
        Ok(Response::Info(RunInfo {
            pid: std::process::id() as i32,
            framework: environment.framework().name().to_string(),
            loaded_at: environment.loaded_at(),
            load_secs: environment.load_secs(),
            file_sets: self.config.file_set_names(),
            known_elements: self.elements.len(),
            fail_fast: self.fail_fast,
            last_run: self.last_result.as_ref().map(|r| r.counts),
        }))
    }

    fn run(&mut self, plan: RunPlan) -> Result<Response> {
        let result = TestEngine::new(self.environment()?)
            .closing_in_executor(&self.supervisor_fds)
            .run(&self.elements, plan)?;
        self.elements = result.elements.clone();
        if !matches!(result.warning, Some(RunWarning::NoMatchingFiles { .. })) {
            self.last_result = Some(result.clone());
        }
        Ok(Response::TestRun(result))
    }

    fn environment(&self) -> Result<&Environment> {
        self.environment.as_ref().ok_or(KettleError::EnvironmentNotLoaded)
    }

    fn all_set(&self) -> Result<Vec<String>> {
        self.config
            .file_set("all")
            .map(<[String]>::to_vec)
            .ok_or_else(|| KettleError::UnknownFileSet { name: "all".into() })
    }
}

fn loaded_report(environment: &Environment) -> EnvironmentReport {
    EnvironmentReport {
        loaded: true,
        elapsed_secs: environment.load_secs(),
        framework: Some(environment.framework().name().to_string()),
        preloaded: environment.preloaded(),
        error: None,
        details: Vec::new(),
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn error_chain(error: &dyn std::error::Error) -> Vec<String> {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_before_load_is_a_failure_response() {
        let mut worker = Worker::new(Config::default());
        let response = worker.dispatch(Request::RunAllTests { words: vec![] });
        assert!(matches!(
            response,
            Response::Failure { ref message, .. } if message.contains("not loaded")
        ));
    }

    #[test]
    fn run_failed_without_history_is_a_notice() {
        let mut worker = Worker::new(Config::default());
        assert_eq!(
            worker.dispatch(Request::RunFailed),
            Response::Notice(NO_FAILURES_NOTICE.into())
        );
    }

    #[test]
    fn timings_without_a_run_are_empty() {
        let mut worker = Worker::new(Config::default());
        assert_eq!(
            worker.dispatch(Request::ShowPerformance { limit: Some(3) }),
            Response::Timings(vec![])
        );
    }

    #[test]
    fn set_fast_toggles_fail_fast() {
        let mut worker = Worker::new(Config::default());
        let response = worker.dispatch(Request::Set {
            name: "fast".into(),
            value: Some("on".into()),
        });
        assert_eq!(
            response,
            Response::Variable {
                name: "fast".into(),
                value: "on".into()
            }
        );
        assert!(worker.fail_fast);

        let bad = worker.dispatch(Request::Set {
            name: "fast".into(),
            value: Some("maybe".into()),
        });
        assert!(matches!(bad, Response::Notice(_)));
        assert!(worker.fail_fast);
    }

    #[test]
    fn unknown_file_set_is_reported() {
        let mut worker = Worker::new(Config::default());
        let response = worker.dispatch(Request::RunFileSet {
            name: "nightly".into(),
        });
        assert!(matches!(
            response,
            Response::Failure { ref message, .. } if message.contains("nightly")
        ));
    }

    #[test]
    fn panics_are_contained() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("kaboom");
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
    }
}
