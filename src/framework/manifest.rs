//! YAML manifest suites.
//!
//! ```yaml
//! suite: MathTest
//! setup: make fixtures        # optional, once per suite before its first selected test
//! tests:
//!   - name: test_add
//!     run: ./bin/calc 2 + 2 | grep -qx 4
//!   - name: test_div
//!     skip: not implemented   # optional
//! ```
//!
//! A test passes when its command exits 0 and is skipped when it exits 77.
//! Any other exit fails it with the captured output as backtrace.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::SystemTime;

use serde::Deserialize;

use super::{ShellEnv, TestFramework};
use crate::engine::context::{CaseStatus, RunContext};
use crate::error::{KettleError, Result};
use crate::result::Outcome;

/// Exit code a test command uses to report itself skipped.
pub const SKIP_EXIT_CODE: i32 = 77;

/// Captured output lines kept per failure.
const MAX_OUTPUT_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SuiteManifest {
    pub suite: String,
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub skip: Option<String>,
}

#[derive(Debug)]
struct CachedManifest {
    modified: Option<SystemTime>,
    manifest: SuiteManifest,
}

enum Setup {
    Pending,
    Done,
    Failed(String),
}

pub struct ManifestFramework {
    shell: ShellEnv,
    cache: HashMap<PathBuf, CachedManifest>,
}

pub fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

pub fn parse(path: &Path) -> Result<SuiteManifest> {
    let contents = std::fs::read_to_string(path).map_err(|e| KettleError::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&contents).map_err(|e| KettleError::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl ManifestFramework {
    pub fn new(shell: ShellEnv) -> Self {
        Self {
            shell,
            cache: HashMap::new(),
        }
    }

    /// Cached copy when the file is unchanged since preload, else a fresh parse.
    fn manifest(&self, path: &Path) -> Result<SuiteManifest> {
        if let Some(cached) = self.cache.get(path) {
            if cached.modified.is_some() && cached.modified == modified(path) {
                return Ok(cached.manifest.clone());
            }
        }
        parse(path)
    }

    fn run_setup(&self, path: &Path, manifest: &SuiteManifest, script: &str) -> Setup {
        let output = self
            .shell
            .shell(script)
            .env("KETTLE_SUITE", &manifest.suite)
            .env("KETTLE_TEST_FILE", path)
            .output();
        match output {
            Ok(output) if output.status.success() => Setup::Done,
            Ok(output) => Setup::Failed(format!(
                "setup `{}` failed ({})",
                script,
                describe_status(&output)
            )),
            Err(e) => Setup::Failed(format!("setup `{}` could not start: {}", script, e)),
        }
    }

    fn run_test(&self, path: &Path, suite: &str, case: &TestCase) -> Outcome {
        if let Some(reason) = &case.skip {
            return Outcome::Skip {
                reason: reason.clone(),
            };
        }
        let Some(script) = &case.run else {
            return Outcome::Skip {
                reason: "no run command".into(),
            };
        };

        let output = match self
            .shell
            .shell(script)
            .env("KETTLE_SUITE", suite)
            .env("KETTLE_TEST", &case.name)
            .env("KETTLE_TEST_FILE", path)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                return Outcome::Error {
                    message: format!("could not start `{}`: {}", script, e),
                    backtrace: vec![location(path, suite, &case.name)],
                }
            }
        };

        let mut lines = output_lines(&output);
        match output.status.code() {
            Some(0) => Outcome::Pass,
            Some(SKIP_EXIT_CODE) => Outcome::Skip {
                reason: lines.pop().unwrap_or_else(|| "skipped".into()),
            },
            Some(code) => {
                lines.insert(0, location(path, suite, &case.name));
                Outcome::Fail {
                    message: format!("`{}` exited with status {}", script, code),
                    backtrace: lines,
                }
            }
            None => {
                lines.insert(0, location(path, suite, &case.name));
                Outcome::Error {
                    message: format!("`{}` {}", script, describe_status(&output)),
                    backtrace: lines,
                }
            }
        }
    }
}

impl TestFramework for ManifestFramework {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn preload(&mut self, paths: &[PathBuf]) -> Result<usize> {
        for path in paths.iter().filter(|p| is_manifest(p)) {
            let manifest = parse(path)?;
            self.cache.insert(
                path.clone(),
                CachedManifest {
                    modified: modified(path),
                    manifest,
                },
            );
        }
        tracing::debug!(count = self.cache.len(), "preloaded manifests");
        Ok(self.cache.len())
    }

    fn execute(&self, paths: &[PathBuf], ctx: &mut RunContext) -> Result<()> {
        'files: for path in paths {
            if ctx.should_stop() {
                break;
            }

            let manifest = match self.manifest(path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    let suite = super::suite_name(path);
                    let status = ctx.run_case(&suite, "(load)", || Outcome::Error {
                        message: e.to_string(),
                        backtrace: vec![path.display().to_string()],
                    });
                    if status == CaseStatus::Halted {
                        break;
                    }
                    continue;
                }
            };

            let mut setup = Setup::Pending;
            for case in &manifest.tests {
                let status = ctx.run_case(&manifest.suite, &case.name, || {
                    if matches!(setup, Setup::Pending) {
                        setup = match manifest.setup.as_deref() {
                            Some(script) => self.run_setup(path, &manifest, script),
                            None => Setup::Done,
                        };
                    }
                    match &setup {
                        Setup::Failed(message) => Outcome::Error {
                            message: message.clone(),
                            backtrace: vec![location(path, &manifest.suite, &case.name)],
                        },
                        _ => self.run_test(path, &manifest.suite, case),
                    }
                });
                if status == CaseStatus::Halted {
                    break 'files;
                }
            }
        }
        Ok(())
    }
}

fn location(path: &Path, suite: &str, test: &str) -> String {
    format!("{}: {}#{}", path.display(), suite, test)
}

fn describe_status(output: &Output) -> String {
    match (output.status.code(), output.status.signal()) {
        (Some(code), _) => format!("exit status {}", code),
        (None, Some(signal)) => format!("terminated by signal {}", signal),
        (None, None) => "terminated abnormally".into(),
    }
}

/// Stdout then stderr, trimmed to the last lines.
fn output_lines(output: &Output) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .chain(String::from_utf8_lossy(&output.stderr).lines())
        .map(str::to_string)
        .collect();
    if lines.len() > MAX_OUTPUT_LINES {
        lines.drain(..lines.len() - MAX_OUTPUT_LINES);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::filter::ElementFilter;
    use crate::result::{ElementIndex, FailureKind};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn run(paths: &[PathBuf], fail_fast: bool) -> crate::result::TestRunResult {
        let framework = ManifestFramework::new(ShellEnv::default());
        let mut ctx = RunContext::new(ElementIndex::new(), ElementFilter::all(), fail_fast);
        framework.execute(paths, &mut ctx).unwrap();
        ctx.finish()
    }

    #[test]
    fn exit_codes_map_to_outcomes() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "math_test.yml",
            r#"
suite: MathTest
tests:
  - name: test_pass
    run: "true"
  - name: test_fail
    run: "echo expected 4; exit 1"
  - name: test_skip_code
    run: "echo needs network; exit 77"
  - name: test_skip_field
    skip: later
"#,
        );

        let result = run(&[path], false);
        assert_eq!(result.counts.passes, 1);
        assert_eq!(result.counts.failures, 1);
        assert_eq!(result.counts.skips, 2);

        let failure = &result.failures[0];
        assert_eq!(failure.element_id, "1-2");
        assert_eq!(failure.kind, FailureKind::Failure);
        assert!(failure.backtrace.iter().any(|l| l == "expected 4"));
    }

    #[test]
    fn failing_setup_errors_every_test_in_the_suite() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "db_test.yml",
            r#"
suite: DbTest
setup: "exit 3"
tests:
  - name: test_a
    run: "true"
  - name: test_b
    run: "true"
"#,
        );

        let result = run(&[path], false);
        assert_eq!(result.counts.errors, 2);
        assert!(result.failures[0].message.contains("setup"));
    }

    #[test]
    fn unparseable_manifest_is_an_error_element() {
        let tmp = TempDir::new().unwrap();
        let bad = write(tmp.path(), "bad_test.yml", "tests: [oops\n");
        let good = write(
            tmp.path(),
            "good_test.yml",
            "suite: Good\ntests:\n  - name: test_ok\n    run: \"true\"\n",
        );

        let result = run(&[bad, good], false);
        assert_eq!(result.counts.errors, 1);
        assert_eq!(result.counts.passes, 1);
        assert_eq!(result.failures[0].method, "(load)");
    }

    #[test]
    fn test_commands_see_their_names() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "env_test.yml",
            r#"
suite: EnvTest
tests:
  - name: test_names
    run: '[ "$KETTLE_SUITE#$KETTLE_TEST" = "EnvTest#test_names" ]'
"#,
        );
        assert_eq!(run(&[path], false).counts.passes, 1);
    }

    #[test]
    fn preload_cache_is_used_until_the_file_changes() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "cached_test.yml",
            "suite: Cached\ntests:\n  - name: test_one\n    run: \"true\"\n",
        );

        let mut framework = ManifestFramework::new(ShellEnv::default());
        assert_eq!(framework.preload(&[path.clone()]).unwrap(), 1);
        assert_eq!(framework.manifest(&path).unwrap().suite, "Cached");
    }
}
