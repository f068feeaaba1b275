pub mod channel;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::{Counts, TestRunResult, Timing};

/// Request sent from the supervisor to the worker. Exactly one is in flight
/// at a time; the channel does no queuing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "kebab-case")]
pub enum Request {
    LoadEnvironment,
    RunFileSet { name: String },
    /// Path-like words select files, the rest filter elements.
    RunAllTests { words: Vec<String> },
    RunFailed,
    ShowPerformance { limit: Option<usize> },
    Autocomplete { prefix: String },
    Set { name: String, value: Option<String> },
    RunInfo,
    Stop,
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::LoadEnvironment => "load-environment",
            Request::RunFileSet { .. } => "run-file-set",
            Request::RunAllTests { .. } => "run-all-tests",
            Request::RunFailed => "run-failed",
            Request::ShowPerformance { .. } => "show-performance",
            Request::Autocomplete { .. } => "autocomplete",
            Request::Set { .. } => "set",
            Request::RunInfo => "run-info",
            Request::Stop => "stop",
        }
    }
}

/// Response from the worker to the supervisor.
///
/// `Failure` is an explicit marker; it is never confused with a successful
/// empty result, and neither is confused with the peer closing the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum Response {
    Environment(EnvironmentReport),
    TestRun(TestRunResult),
    Notice(String),
    Timings(Vec<Timing>),
    Completions(Vec<String>),
    Variable { name: String, value: String },
    Info(RunInfo),
    Stopped,
    Failure {
        message: String,
        backtrace: Vec<String>,
    },
}

impl Response {
    pub fn failure(message: impl Into<String>) -> Self {
        Response::Failure {
            message: message.into(),
            backtrace: Vec::new(),
        }
    }
}

/// Outcome of a `load-environment` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReport {
    pub loaded: bool,
    pub elapsed_secs: f64,
    pub framework: Option<String>,
    pub preloaded: usize,
    pub error: Option<String>,
    /// Error source chain, shown in trace mode.
    pub details: Vec<String>,
}

impl EnvironmentReport {
    pub fn failed(error: impl Into<String>, details: Vec<String>, elapsed_secs: f64) -> Self {
        Self {
            loaded: false,
            elapsed_secs,
            framework: None,
            preloaded: 0,
            error: Some(error.into()),
            details,
        }
    }
}

/// Answer to `run-info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub pid: i32,
    pub framework: String,
    pub loaded_at: DateTime<Utc>,
    pub load_secs: f64,
    pub file_sets: Vec<String>,
    pub known_elements: usize,
    pub fail_fast: bool,
    pub last_run: Option<Counts>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_carries_action_and_args() {
        let json = serde_json::to_value(Request::Set {
            name: "fast".into(),
            value: Some("on".into()),
        })
        .unwrap();
        assert_eq!(json["action"], "set");
        assert_eq!(json["args"]["name"], "fast");

        let stop = serde_json::to_string(&Request::Stop).unwrap();
        assert_eq!(stop, r#"{"action":"stop"}"#);
    }

    #[test]
    fn failure_is_not_an_empty_result() {
        let failure = serde_json::to_string(&Response::failure("boom")).unwrap();
        let empty = serde_json::to_string(&Response::Completions(Vec::new())).unwrap();
        assert_ne!(failure, empty);

        let back: Response = serde_json::from_str(&failure).unwrap();
        assert!(matches!(back, Response::Failure { ref message, .. } if message == "boom"));
    }
}
