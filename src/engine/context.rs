use std::io::Write;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::engine::filter::ElementFilter;
use crate::result::{
    Counts, ElementIndex, FailureDetail, FailureKind, Outcome, RunWarning, TestRunResult, Timing,
};

/// What happened to a case offered to [`RunContext::run_case`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Ran,
    NotSelected,
    /// Fail-fast or an interrupt ended the run; stop offering cases.
    Halted,
}

/// Accumulates one run inside an executor.
///
/// Framework adapters offer every case they discover; the context assigns
/// element ids, applies the filter, enforces fail-fast, and collects counts,
/// failures and timings. [`RunContext::finish`] consumes it, so a run can be
/// reported exactly once.
pub struct RunContext {
    elements: ElementIndex,
    filter: ElementFilter,
    fail_fast: bool,
    counts: Counts,
    failures: Vec<FailureDetail>,
    timings: Vec<Timing>,
    halted: bool,
    interrupted: bool,
    interrupt_check: fn() -> bool,
    progress: Option<Box<dyn Write>>,
    started: Instant,
}

fn never_interrupted() -> bool {
    false
}

impl RunContext {
    pub fn new(elements: ElementIndex, filter: ElementFilter, fail_fast: bool) -> Self {
        Self {
            elements,
            filter,
            fail_fast,
            counts: Counts::default(),
            failures: Vec::new(),
            timings: Vec::new(),
            halted: false,
            interrupted: false,
            interrupt_check: never_interrupted,
            progress: None,
            started: Instant::now(),
        }
    }

    pub fn with_interrupt_check(mut self, check: fn() -> bool) -> Self {
        self.interrupt_check = check;
        self
    }

    /// Write one progress marker per recorded element to `out`.
    pub fn with_progress<W: Write + 'static>(mut self, out: W) -> Self {
        self.progress = Some(Box::new(out));
        self
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// True once no further case may run.
    pub fn should_stop(&mut self) -> bool {
        if !self.interrupted && (self.interrupt_check)() {
            tracing::debug!("run interrupted");
            self.interrupted = true;
        }
        self.halted || self.interrupted
    }

    /// Assign an id to `(suite, method)` and report whether the filter wants it.
    pub fn select(&mut self, suite: &str, method: &str) -> Option<String> {
        let id = self.elements.id_for(suite, method);
        self.filter.selects(&id, suite, method).then_some(id)
    }

    /// Run `case` if the element is selected and the run is still going.
    pub fn run_case<F>(&mut self, suite: &str, method: &str, case: F) -> CaseStatus
    where
        F: FnOnce() -> Outcome,
    {
        if self.should_stop() {
            return CaseStatus::Halted;
        }
        if self.select(suite, method).is_none() {
            return CaseStatus::NotSelected;
        }

        let started = Instant::now();
        let outcome = case();
        let elapsed = started.elapsed();

        // A case cut short by an interrupt has no meaningful outcome.
        if self.should_stop() {
            return CaseStatus::Halted;
        }
        self.record(suite, method, outcome, elapsed);
        if self.halted {
            CaseStatus::Halted
        } else {
            CaseStatus::Ran
        }
    }

    /// Record an outcome produced outside [`run_case`](Self::run_case), e.g.
    /// parsed from a stream. Returns false if it was dropped because the run
    /// already stopped or the element is not selected.
    pub fn record(
        &mut self,
        suite: &str,
        method: &str,
        outcome: Outcome,
        elapsed: Duration,
    ) -> bool {
        if self.halted || self.interrupted {
            return false;
        }
        let Some(id) = self.select(suite, method) else {
            return false;
        };

        let halts = self.fail_fast && outcome.is_failure();
        self.counts.add(&outcome);
        self.mark(outcome.marker());
        self.timings.push(Timing {
            element_id: id.clone(),
            suite: suite.to_string(),
            method: method.to_string(),
            duration_secs: elapsed.as_secs_f64(),
        });

        let (kind, message, backtrace) = match outcome {
            Outcome::Fail { message, backtrace } => (FailureKind::Failure, message, backtrace),
            Outcome::Error { message, backtrace } => (FailureKind::Error, message, backtrace),
            Outcome::Pass | Outcome::Skip { .. } => return true,
        };
        self.failures.push(FailureDetail {
            element_id: id,
            suite: suite.to_string(),
            method: method.to_string(),
            kind,
            message,
            backtrace,
        });

        if halts {
            tracing::debug!("fail-fast: halting after {}", canonical(suite, method));
            self.halted = true;
        }
        true
    }

    /// Append a line to the most recent failure, if it was the last element recorded.
    pub fn append_to_last_failure(&mut self, line: String) {
        let last_id = self.timings.last().map(|t| t.element_id.as_str());
        if let Some(failure) = self.failures.last_mut() {
            if Some(failure.element_id.as_str()) == last_id {
                failure.backtrace.push(line);
            }
        }
    }

    pub fn finish(mut self) -> TestRunResult {
        let warning = self.interrupted.then_some(RunWarning::Interrupted);
        self.end_progress();
        TestRunResult {
            counts: self.counts,
            failures: self.failures,
            timings: self.timings,
            elements: self.elements,
            warning,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            finished_at: Utc::now(),
        }
    }

    /// End the run before any case executed.
    pub fn abort(mut self, reason: String) -> TestRunResult {
        self.end_progress();
        TestRunResult::empty(self.elements).with_warning(RunWarning::Aborted { reason })
    }

    fn mark(&mut self, marker: char) {
        if let Some(out) = self.progress.as_mut() {
            let _ = write!(out, "{}", marker);
            let _ = out.flush();
        }
    }

    fn end_progress(&mut self) {
        if self.timings.is_empty() {
            return;
        }
        if let Some(out) = self.progress.as_mut() {
            let _ = writeln!(out);
            let _ = out.flush();
        }
    }
}

fn canonical(suite: &str, method: &str) -> String {
    crate::result::elements::canonical_name(suite, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fail() -> Outcome {
        Outcome::Fail {
            message: "expected 4, got 5".into(),
            backtrace: vec![],
        }
    }

    #[test]
    fn fail_fast_halts_after_first_failure() {
        let mut ctx = RunContext::new(ElementIndex::new(), ElementFilter::all(), true);
        let outcomes = [Outcome::Pass, fail(), Outcome::Pass, Outcome::Pass, Outcome::Pass];

        let mut ran = 0;
        for (n, outcome) in outcomes.into_iter().enumerate() {
            let status = ctx.run_case("Suite", &format!("test_{}", n), || outcome);
            if status == CaseStatus::Halted {
                break;
            }
            ran += 1;
        }

        let result = ctx.finish();
        assert_eq!(ran, 1);
        assert_eq!(result.executed(), 2);
        assert_eq!(result.counts.passes, 1);
        assert_eq!(result.counts.failures, 1);
        assert_eq!(result.failed_ids(), vec!["1-2"]);
    }

    #[test]
    fn unselected_cases_still_get_ids() {
        let filter = ElementFilter::parse(&["test_b"]).unwrap();
        let mut ctx = RunContext::new(ElementIndex::new(), filter, false);

        assert_eq!(ctx.run_case("S", "test_a", || Outcome::Pass), CaseStatus::NotSelected);
        assert_eq!(ctx.run_case("S", "test_b", || Outcome::Pass), CaseStatus::Ran);

        let result = ctx.finish();
        assert_eq!(result.executed(), 1);
        assert_eq!(result.timings[0].element_id, "1-2");
        assert_eq!(result.elements.len(), 2);
    }

    #[test]
    fn errors_and_failures_are_kept_in_order() {
        let mut ctx = RunContext::new(ElementIndex::new(), ElementFilter::all(), false);
        ctx.run_case("S", "a", fail);
        ctx.run_case("S", "b", || Outcome::Error {
            message: "boom".into(),
            backtrace: vec!["line 1".into()],
        });
        ctx.run_case("S", "c", || Outcome::Skip {
            reason: "later".into(),
        });

        let result = ctx.finish();
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].kind, FailureKind::Failure);
        assert_eq!(result.failures[1].kind, FailureKind::Error);
        assert_eq!(result.counts.skips, 1);
    }

    #[test]
    fn interrupt_returns_partial_result_with_warning() {
        static STOP: AtomicBool = AtomicBool::new(false);
        fn stop_requested() -> bool {
            STOP.load(Ordering::SeqCst)
        }

        let mut ctx = RunContext::new(ElementIndex::new(), ElementFilter::all(), false)
            .with_interrupt_check(stop_requested);
        ctx.run_case("S", "a", || Outcome::Pass);
        STOP.store(true, Ordering::SeqCst);
        assert_eq!(ctx.run_case("S", "b", || Outcome::Pass), CaseStatus::Halted);

        let result = ctx.finish();
        assert_eq!(result.executed(), 1);
        assert_eq!(result.warning, Some(RunWarning::Interrupted));
    }

    #[test]
    fn diagnostics_attach_only_to_the_latest_failure() {
        let mut ctx = RunContext::new(ElementIndex::new(), ElementFilter::all(), false);
        ctx.record("S", "a", fail(), Duration::ZERO);
        ctx.append_to_last_failure("got: 5".into());
        ctx.record("S", "b", Outcome::Pass, Duration::ZERO);
        ctx.append_to_last_failure("stray".into());

        let result = ctx.finish();
        assert_eq!(result.failures[0].backtrace, vec!["got: 5"]);
    }

    #[test]
    fn abort_carries_reason_and_runs_nothing() {
        let ctx = RunContext::new(ElementIndex::new(), ElementFilter::all(), false);
        let result = ctx.abort("hook failed".into());
        assert_eq!(result.executed(), 0);
        assert!(!result.is_success());
    }
}
