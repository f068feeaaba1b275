//! Executables that report results with the Test Anything Protocol.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Stdio};
use std::time::{Duration, Instant};

use super::{ShellEnv, TestFramework};
use crate::engine::context::{CaseStatus, RunContext};
use crate::error::Result;
use crate::result::Outcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Skip(String),
    Todo(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapTest {
    pub ok: bool,
    pub number: Option<u32>,
    pub description: String,
    pub directive: Option<Directive>,
}

impl TapTest {
    fn method(&self, seq: u32) -> String {
        if self.description.is_empty() {
            format!("test {}", self.number.unwrap_or(seq))
        } else {
            self.description.clone()
        }
    }

    fn outcome(&self) -> Outcome {
        match (&self.directive, self.ok) {
            (Some(Directive::Skip(reason)), _) => Outcome::Skip {
                reason: reason.clone(),
            },
            (Some(Directive::Todo(reason)), false) => Outcome::Skip {
                reason: format!("TODO {}", reason).trim_end().to_string(),
            },
            (_, true) => Outcome::Pass,
            (_, false) => Outcome::Fail {
                message: if self.description.is_empty() {
                    "not ok".into()
                } else {
                    format!("not ok: {}", self.description)
                },
                backtrace: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapLine {
    Test(TapTest),
    Diagnostic(String),
    BailOut(String),
    Other,
}

pub fn parse_line(line: &str) -> TapLine {
    let line = line.trim_end();
    if let Some(rest) = line.strip_prefix("not ok") {
        return parse_test(false, rest);
    }
    if let Some(rest) = line.strip_prefix("ok") {
        return parse_test(true, rest);
    }
    if let Some(reason) = line.strip_prefix("Bail out!") {
        return TapLine::BailOut(reason.trim().to_string());
    }
    if let Some(text) = line.trim_start().strip_prefix('#') {
        return TapLine::Diagnostic(text.trim().to_string());
    }
    TapLine::Other
}

fn parse_test(ok: bool, rest: &str) -> TapLine {
    if !(rest.is_empty() || rest.starts_with(' ')) {
        return TapLine::Other;
    }
    let rest = rest.trim_start();
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let number = rest[..digits].parse().ok();
    let rest = rest[digits..].trim_start();
    let rest = rest.strip_prefix('-').unwrap_or(rest).trim_start();

    let (description, directive) = match rest.split_once('#') {
        Some((description, directive)) => (description, parse_directive(directive)),
        None => (rest, None),
    };

    TapLine::Test(TapTest {
        ok,
        number,
        description: description.trim().to_string(),
        directive,
    })
}

fn parse_directive(text: &str) -> Option<Directive> {
    let text = text.trim();
    let (word, reason) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let word = word.to_ascii_uppercase();
    let reason = reason.trim().to_string();
    if word.starts_with("SKIP") {
        Some(Directive::Skip(reason))
    } else if word.starts_with("TODO") {
        Some(Directive::Todo(reason))
    } else {
        None
    }
}

pub struct TapFramework {
    shell: ShellEnv,
}

impl TapFramework {
    pub fn new(shell: ShellEnv) -> Self {
        Self { shell }
    }

    /// Returns false once the run should stop.
    fn run_file(&self, path: &Path, ctx: &mut RunContext) -> bool {
        let suite = super::suite_name(path);

        let mut child = match self
            .shell
            .program(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let status = ctx.run_case(&suite, "(load)", || Outcome::Error {
                    message: format!("could not start {}: {}", path.display(), e),
                    backtrace: Vec::new(),
                });
                return status != CaseStatus::Halted;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            reap(&mut child, false);
            return true;
        };

        let failures_before = ctx.counts().failures + ctx.counts().errors;
        let stopped = self.consume(&suite, BufReader::new(stdout), ctx);
        let status = reap(&mut child, stopped);

        if stopped {
            return false;
        }
        let failures_after = ctx.counts().failures + ctx.counts().errors;
        if let Some(status) = status.filter(|s| !s.success()) {
            if failures_after == failures_before {
                let case = ctx.run_case(&suite, "(exit)", || Outcome::Error {
                    message: format!("{} exited with {}", path.display(), status),
                    backtrace: Vec::new(),
                });
                return case != CaseStatus::Halted;
            }
        }
        true
    }

    /// Read the stream to the end. Returns true if the run stopped early,
    /// including on `Bail out!`.
    fn consume(
        &self,
        suite: &str,
        mut reader: BufReader<ChildStdout>,
        ctx: &mut RunContext,
    ) -> bool {
        let mut seq = 0;
        let mut mark = Instant::now();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => return false,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("tap stream read failed: {}", e);
                    return false;
                }
            }

            match parse_line(&line) {
                TapLine::Test(test) => {
                    seq += 1;
                    let elapsed = mark.elapsed();
                    mark = Instant::now();
                    ctx.record(suite, &test.method(seq), test.outcome(), elapsed);
                }
                TapLine::Diagnostic(text) => ctx.append_to_last_failure(text),
                TapLine::BailOut(reason) => {
                    ctx.record(
                        suite,
                        "(bail out)",
                        Outcome::Error {
                            message: format!("Bail out! {}", reason).trim_end().to_string(),
                            backtrace: Vec::new(),
                        },
                        Duration::ZERO,
                    );
                    return true;
                }
                TapLine::Other => {}
            }

            if ctx.should_stop() {
                // Keep diagnostics that already arrived with the failure.
                drain_buffered_diagnostics(&reader, ctx);
                return true;
            }
        }
    }
}

/// Complete lines already sitting in the buffer only. Never reads from the
/// pipe: the script is still running and may not finish its current line.
fn drain_buffered_diagnostics(reader: &BufReader<ChildStdout>, ctx: &mut RunContext) {
    let buffered = String::from_utf8_lossy(reader.buffer());
    let Some(end) = buffered.rfind('\n') else {
        return;
    };
    for line in buffered[..end].lines() {
        match parse_line(line) {
            TapLine::Diagnostic(text) => ctx.append_to_last_failure(text),
            _ => break,
        }
    }
}

fn reap(child: &mut Child, kill: bool) -> Option<std::process::ExitStatus> {
    if kill {
        let _ = child.kill();
    }
    match child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::debug!("could not reap tap process: {}", e);
            None
        }
    }
}

impl TestFramework for TapFramework {
    fn name(&self) -> &'static str {
        "tap"
    }

    fn execute(&self, paths: &[PathBuf], ctx: &mut RunContext) -> Result<()> {
        for path in paths {
            if ctx.should_stop() || !self.run_file(path, ctx) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::filter::ElementFilter;
    use crate::result::{ElementIndex, TestRunResult};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn run(paths: &[PathBuf], fail_fast: bool) -> TestRunResult {
        let framework = TapFramework::new(ShellEnv::default());
        let mut ctx = RunContext::new(ElementIndex::new(), ElementFilter::all(), fail_fast);
        framework.execute(paths, &mut ctx).unwrap();
        ctx.finish()
    }

    #[test]
    fn parses_test_lines() {
        assert_eq!(
            parse_line("ok 1 - adds numbers"),
            TapLine::Test(TapTest {
                ok: true,
                number: Some(1),
                description: "adds numbers".into(),
                directive: None,
            })
        );
        assert_eq!(
            parse_line("not ok 2 network # SKIP offline"),
            TapLine::Test(TapTest {
                ok: false,
                number: Some(2),
                description: "network".into(),
                directive: Some(Directive::Skip("offline".into())),
            })
        );
        assert_eq!(parse_line("# got: 5"), TapLine::Diagnostic("got: 5".into()));
        assert_eq!(parse_line("Bail out! db down"), TapLine::BailOut("db down".into()));
        assert_eq!(parse_line("1..4"), TapLine::Other);
        assert_eq!(parse_line("okay then"), TapLine::Other);
    }

    #[test]
    fn todo_failures_do_not_count_as_failures() {
        let TapLine::Test(test) = parse_line("not ok 3 # TODO flaky") else {
            panic!("expected a test line");
        };
        assert!(matches!(test.outcome(), Outcome::Skip { .. }));
    }

    #[test]
    fn stream_results_and_diagnostics_are_collected() {
        let tmp = TempDir::new().unwrap();
        let path = script(
            tmp.path(),
            "math.t",
            "echo 1..3\necho 'ok 1 - add'\necho 'not ok 2 - div'\necho '# expected 2'\necho 'ok 3 # skip slow'\n",
        );

        let result = run(&[path], false);
        assert_eq!(result.counts.passes, 1);
        assert_eq!(result.counts.failures, 1);
        assert_eq!(result.counts.skips, 1);
        assert_eq!(result.failures[0].method, "div");
        assert_eq!(result.failures[0].backtrace, vec!["expected 2"]);
    }

    #[test]
    fn silent_nonzero_exit_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = script(tmp.path(), "crash.t", "echo 'ok 1 - first'\nexit 2\n");

        let result = run(&[path], false);
        assert_eq!(result.counts.passes, 1);
        assert_eq!(result.counts.errors, 1);
        assert_eq!(result.failures[0].method, "(exit)");
    }

    #[test]
    fn fail_fast_stops_reading_after_first_failure() {
        let tmp = TempDir::new().unwrap();
        let first = script(
            tmp.path(),
            "a.t",
            "echo 'ok 1 - one'\necho 'not ok 2 - two'\necho 'ok 3 - three'\n",
        );
        let second = script(tmp.path(), "b.t", "echo 'ok 1 - other'\n");

        let result = run(&[first, second], true);
        assert_eq!(result.executed(), 2);
        assert_eq!(result.counts.failures, 1);
    }

    #[test]
    fn fail_fast_kills_script_with_an_unfinished_line() {
        let tmp = TempDir::new().unwrap();
        let path = script(
            tmp.path(),
            "slow.t",
            "printf 'ok 1\\nnot ok 2\\n# partial'\nsleep 5\n",
        );

        let started = Instant::now();
        let result = run(&[path], true);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.executed(), 2);
        assert_eq!(result.counts.failures, 1);
        assert!(result.failures[0].backtrace.is_empty());
    }
}
