pub mod elements;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use elements::ElementIndex;

/// How a single executed element ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail {
        message: String,
        backtrace: Vec<String>,
    },
    Error {
        message: String,
        backtrace: Vec<String>,
    },
    Skip {
        reason: String,
    },
}

impl Outcome {
    /// True for outcomes that trip fail-fast.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Fail { .. } | Outcome::Error { .. })
    }

    /// One-character progress marker.
    pub fn marker(&self) -> char {
        match self {
            Outcome::Pass => '.',
            Outcome::Fail { .. } => 'F',
            Outcome::Error { .. } => 'E',
            Outcome::Skip { .. } => 'S',
        }
    }
}

/// Outcome tallies for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub passes: usize,
    pub failures: usize,
    pub errors: usize,
    pub skips: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.passes + self.failures + self.errors + self.skips
    }

    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Pass => self.passes += 1,
            Outcome::Fail { .. } => self.failures += 1,
            Outcome::Error { .. } => self.errors += 1,
            Outcome::Skip { .. } => self.skips += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Failure,
    Error,
}

/// A failing or erroring element, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub element_id: String,
    pub suite: String,
    pub method: String,
    pub kind: FailureKind,
    pub message: String,
    pub backtrace: Vec<String>,
}

/// Wall time spent in one executed element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub element_id: String,
    pub suite: String,
    pub method: String,
    pub duration_secs: f64,
}

impl Timing {
    pub fn name(&self) -> String {
        elements::canonical_name(&self.suite, &self.method)
    }
}

/// Why a run produced less than a normal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunWarning {
    /// The requested globs matched no files; nothing was executed.
    NoMatchingFiles { patterns: Vec<String> },
    /// An interrupt stopped the run; results cover what finished.
    Interrupted,
    /// The executor died or its payload could not be read.
    ExecutorCrashed { reason: String },
    /// A pre-run hook failed before any test started.
    Aborted { reason: String },
}

/// Aggregate result of one test execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub counts: Counts,
    pub failures: Vec<FailureDetail>,
    pub timings: Vec<Timing>,
    /// Element index snapshot valid once this run finished.
    pub elements: ElementIndex,
    pub warning: Option<RunWarning>,
    pub elapsed_secs: f64,
    pub finished_at: DateTime<Utc>,
}

impl TestRunResult {
    /// A successful-shaped result with nothing executed.
    pub fn empty(elements: ElementIndex) -> Self {
        Self {
            counts: Counts::default(),
            failures: Vec::new(),
            timings: Vec::new(),
            elements,
            warning: None,
            elapsed_secs: 0.0,
            finished_at: Utc::now(),
        }
    }

    pub fn no_matching_files(patterns: Vec<String>, elements: ElementIndex) -> Self {
        Self {
            warning: Some(RunWarning::NoMatchingFiles { patterns }),
            ..Self::empty(elements)
        }
    }

    pub fn with_warning(mut self, warning: RunWarning) -> Self {
        self.warning = Some(warning);
        self
    }

    /// Number of elements that actually ran.
    pub fn executed(&self) -> usize {
        self.timings.len()
    }

    /// Ids of every failing or erroring element, in run order.
    pub fn failed_ids(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.element_id.clone()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.counts.failures == 0
            && self.counts.errors == 0
            && !matches!(
                self.warning,
                Some(RunWarning::ExecutorCrashed { .. }) | Some(RunWarning::Aborted { .. })
            )
    }

    pub fn slowest(&self, limit: Option<usize>) -> Vec<Timing> {
        slowest(&self.timings, limit)
    }
}

/// Timings sorted by duration, longest first. `None` or `Some(0)` keeps all.
pub fn slowest(timings: &[Timing], limit: Option<usize>) -> Vec<Timing> {
    let mut sorted = timings.to_vec();
    sorted.sort_by(|a, b| b.duration_secs.total_cmp(&a.duration_secs));
    match limit {
        Some(n) if n > 0 => {
            sorted.truncate(n);
            sorted
        }
        _ => sorted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(id: &str, secs: f64) -> Timing {
        Timing {
            element_id: id.into(),
            suite: "Suite".into(),
            method: format!("test_{}", id),
            duration_secs: secs,
        }
    }

    #[test]
    fn slowest_orders_descending_and_limits() {
        let timings = vec![timing("1-1", 0.2), timing("1-2", 1.5), timing("1-3", 0.05)];

        let top = slowest(&timings, Some(2));
        let secs: Vec<f64> = top.iter().map(|t| t.duration_secs).collect();
        assert_eq!(secs, vec![1.5, 0.2]);
    }

    #[test]
    fn slowest_without_limit_returns_all() {
        let timings = vec![timing("1-1", 0.2), timing("1-2", 1.5), timing("1-3", 0.05)];
        assert_eq!(slowest(&timings, None).len(), 3);
        assert_eq!(slowest(&timings, Some(0)).len(), 3);
        assert_eq!(slowest(&timings, Some(10)).len(), 3);
    }

    #[test]
    fn counts_track_each_outcome() {
        let mut counts = Counts::default();
        counts.add(&Outcome::Pass);
        counts.add(&Outcome::Skip {
            reason: "later".into(),
        });
        counts.add(&Outcome::Fail {
            message: "nope".into(),
            backtrace: vec![],
        });
        assert_eq!(counts.passes, 1);
        assert_eq!(counts.skips, 1);
        assert_eq!(counts.failures, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn no_matching_files_is_distinct_from_empty_success() {
        let empty = TestRunResult::empty(ElementIndex::new());
        let none = TestRunResult::no_matching_files(vec!["x/*".into()], ElementIndex::new());

        assert_eq!(empty.executed(), none.executed());
        assert!(empty.warning.is_none());
        assert!(matches!(
            none.warning,
            Some(RunWarning::NoMatchingFiles { ref patterns }) if *patterns == vec!["x/*".to_string()]
        ));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&Outcome::Skip {
            reason: "slow".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"skip","reason":"slow"}"#);
    }
}
